//! Shared test utilities for the end-to-end suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use corelink::{ClientConfig, Connection, Conversation, DispatchPool, HandshakeProperties};
use corelink_wire::testing::RecordingConversation;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use uuid::Uuid;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness; shown with `--nocapture`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// TestClient - connection over a recording conversation
// ============================================================================

/// Connection plus the conversation it records to.
pub struct TestClient {
    pub conv: Arc<RecordingConversation>,
    pub conn: Connection,
    pub dir: TempDir,
}

impl TestClient {
    /// Client configured from a freshly written `corelink.toml`.
    pub fn new() -> Self {
        Self::with_handshake(HandshakeProperties {
            me_uuid: Some(Uuid::new_v4()),
            ..HandshakeProperties::default()
        })
    }

    pub fn with_handshake(handshake: HandshakeProperties) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(corelink::CONFIG_FILE_NAME);
        ClientConfig::write_default_if_missing(&path).unwrap();
        let config = ClientConfig::from_file(&path).unwrap();

        let conv = Arc::new(RecordingConversation::new(handshake));
        let pool = Arc::new(DispatchPool::new(config.dispatch_threads, config.dispatch_queue_depth).unwrap());
        let conn = Connection::new(conv.clone(), config, pool).unwrap();
        Self { conv, conn, dir }
    }

    /// Second connection on the same link, talking to the same engine.
    pub fn sibling(&self) -> (Arc<RecordingConversation>, Connection) {
        let conv = Arc::new(self.conv.on_same_link(self.conv.handshake().clone()));
        let conn = Connection::with_own_pool(conv.clone(), ClientConfig::default()).unwrap();
        (conv, conn)
    }
}
