//! X/Open XA flags, vote codes and error codes
//!
//! Values follow the XA specification so they can be exchanged with any
//! transaction manager and with the messaging engine unchanged.

// ============================================================================
// Flags
// ============================================================================

/// No flags set.
pub const TMNOFLAGS: i32 = 0x0000_0000;

/// Caller is joining an existing transaction branch.
pub const TMJOIN: i32 = 0x0020_0000;

/// Caller is resuming association with a suspended transaction branch.
pub const TMRESUME: i32 = 0x0800_0000;

/// Dissociate caller from the transaction branch (work succeeded).
pub const TMSUCCESS: i32 = 0x0400_0000;

/// Dissociate caller from the transaction branch (work failed).
pub const TMFAIL: i32 = 0x2000_0000;

/// Caller is suspending, not ending, its association with the branch.
pub const TMSUSPEND: i32 = 0x0200_0000;

/// Start a recovery scan.
pub const TMSTARTRSCAN: i32 = 0x0100_0000;

/// End a recovery scan.
pub const TMENDRSCAN: i32 = 0x0080_0000;

/// Use the one-phase commit optimization.
pub const TMONEPHASE: i32 = 0x4000_0000;

/// Returns true if `flags` contains every bit of `flag`.
pub fn has_flag(flags: i32, flag: i32) -> bool {
    flags & flag == flag && flag != 0
}

// ============================================================================
// Prepare votes
// ============================================================================

/// The branch was prepared and may be committed.
pub const XA_OK: i32 = 0;

/// The branch was read-only and has already been committed.
pub const XA_RDONLY: i32 = 3;

// ============================================================================
// Error codes
// ============================================================================

/// Asynchronous operation already outstanding.
pub const XAER_ASYNC: i32 = -2;

/// A resource manager error occurred in the transaction branch.
pub const XAER_RMERR: i32 = -3;

/// The Xid is not valid.
pub const XAER_NOTA: i32 = -4;

/// Invalid arguments were given.
pub const XAER_INVAL: i32 = -5;

/// Routine invoked in an improper context.
pub const XAER_PROTO: i32 = -6;

/// Resource manager unavailable.
pub const XAER_RMFAIL: i32 = -7;

/// The Xid already exists.
pub const XAER_DUPID: i32 = -8;

/// Resource manager doing work outside the global transaction.
pub const XAER_OUTSIDE: i32 = -9;

/// Lower bound of the rollback codes.
pub const XA_RBBASE: i32 = 100;

/// Rollback caused by an unspecified reason.
pub const XA_RBROLLBACK: i32 = XA_RBBASE;

/// Rollback caused by a communication failure.
pub const XA_RBCOMMFAIL: i32 = XA_RBBASE + 1;

/// Rollback caused by a transient condition; the branch may be retried.
pub const XA_RBTRANSIENT: i32 = XA_RBBASE + 7;

/// Upper bound of the rollback codes.
pub const XA_RBEND: i32 = XA_RBTRANSIENT;

/// Short symbolic name for an XA error code, used in log output and messages.
pub fn error_code_name(code: i32) -> &'static str {
    match code {
        XAER_ASYNC => "XAER_ASYNC",
        XAER_RMERR => "XAER_RMERR",
        XAER_NOTA => "XAER_NOTA",
        XAER_INVAL => "XAER_INVAL",
        XAER_PROTO => "XAER_PROTO",
        XAER_RMFAIL => "XAER_RMFAIL",
        XAER_DUPID => "XAER_DUPID",
        XAER_OUTSIDE => "XAER_OUTSIDE",
        c if (XA_RBBASE..=XA_RBEND).contains(&c) => "XA_RB*",
        _ => "XA_UNKNOWN",
    }
}
