pub mod access;
pub mod allocator;
pub mod audit;
pub mod booking;
pub mod cancellation;
pub mod checkin;
pub mod mileage;
pub mod notifications;
pub mod orders;
pub mod qr;
pub mod refund;
pub mod reveal;
pub mod upgrade;
