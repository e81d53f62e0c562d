//! Domain models for the returns service.

pub mod order;
pub mod reason;
pub mod return_request;
pub mod settings;

pub use order::{Order, OrderItem};
pub use reason::{ReasonInput, ReturnReason};
pub use return_request::{
    CreateReturnInput, CreateReturnItemInput, NewReturnItem, NewReturnRequest,
    NewStatusHistoryEvent, ReturnDetail, ReturnFilter, ReturnItem, ReturnRequest,
    StatusHistoryEvent, StatusPatch, TransitionInput,
};
pub use settings::ReturnSettings;
