pub mod numbering;
pub mod rental_return;
pub mod transaction;

pub use numbering::allocate_transaction_number;
pub use rental_return::RentalReturnProcessor;
pub use transaction::TransactionService;
