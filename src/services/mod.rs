// Checkout core
pub mod orders;
pub mod payment_gateway;
pub mod payments;
pub mod settlements;
pub mod stock;

// Accounts and catalog
pub mod accounts;
pub mod catalog;

// Enterprise back office
pub mod dashboard;
pub mod vouchers;
