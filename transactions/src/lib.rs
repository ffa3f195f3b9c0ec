// ============================================================================
// RENTORA - TRANSACTION ENGINE
// ============================================================================
// Module: transactions/src/lib.rs
// Description: Purchase, sale, and rental transactions; returns, payments,
//              and the rental lifecycle
// ============================================================================

pub mod models;
pub mod services;

pub use models::*;
pub use services::*;
