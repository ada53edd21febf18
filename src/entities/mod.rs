pub mod account;
pub mod category;
pub mod customer;
pub mod enterprise;
pub mod food;
pub mod order;
pub mod order_detail;
pub mod payment;
pub mod payment_webhook_event;
pub mod settlement;
pub mod settlement_item;
pub mod voucher;
