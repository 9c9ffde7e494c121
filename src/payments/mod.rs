//! Payment domain: discounts, gateway sessions and settlement

pub mod discount;
pub mod gateway;
pub mod model;
pub mod service;
pub mod settlement;

pub use discount::{DiscountError, DiscountService, Quote};
pub use gateway::{GatewayClient, GatewayError};
pub use model::{
    CheckoutResponse, CouponCheckRequest, CouponCheckResponse, CreatePaymentRequest, DiscountCode,
    DiscountKind, Payment, PaymentSnapshot, PaymentState, PaymentStatus, SettleRequest,
};
pub use service::{PaymentError, PaymentService};
pub use settlement::{GatewayStatus, SettlementError, SettlementOutcome, SettlementService};
