pub mod inventory;
pub mod master_data;
pub mod movements;
pub mod sku_generator;

pub use inventory::InventoryService;
pub use master_data::MasterDataService;
pub use movements::MovementLedger;
pub use sku_generator::SkuGeneratorService;
