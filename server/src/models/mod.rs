pub mod checkin;
pub mod event;
pub mod order;
pub mod scanner;
pub mod seat;
pub mod ticket;
pub mod user;

pub use checkin::{CheckinRecord, CheckinResult, CheckinStage};
pub use event::{DiscountKind, DiscountPolicy, Event, EventStatus};
pub use order::{Order, OrderStatus};
pub use scanner::ScannerDevice;
pub use seat::{Seat, SeatBlock, SeatGrade, SeatStatus};
pub use ticket::{CheckinStamp, Ticket, TicketState, TicketStatus};
pub use user::{Mileage, MileageEntry, MileageKind, MileageTier, Role, User};
