pub mod cart;
pub mod housekeeping;
pub mod orders;
pub mod verification;

pub use cart::CartService;
pub use orders::OrderService;
pub use verification::VerificationService;
