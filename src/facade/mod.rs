pub mod documents;
pub mod transactions;

pub use documents::Page;
pub use transactions::{TxnOptions, TxnScope};
