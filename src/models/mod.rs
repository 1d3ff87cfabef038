pub mod payment;
pub mod plan;
pub mod restaurant;
pub mod user;

pub use payment::*;
pub use plan::*;
pub use restaurant::*;
pub use user::*;
