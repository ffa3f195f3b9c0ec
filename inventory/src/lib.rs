// ============================================================================
// RENTORA - INVENTORY ENGINE
// ============================================================================
// Module: inventory/src/lib.rs
// Description: Stock levels, serialized units, movement ledger, SKU minting
// ============================================================================

pub mod models;
pub mod services;

pub use models::*;
pub use services::*;
