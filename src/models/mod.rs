pub mod actor;
pub mod driver;
pub mod earnings;
pub mod payout;
pub mod shipment;
