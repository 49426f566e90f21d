mod domain;
mod engine;

pub use domain::{
    EscrowStatus, Gig, GigDraft, GigPackage, GigRequirement, OrderDelivery, OrderStatus,
    PackageTier, ServiceOrder, ServiceReview,
};
pub use engine::OrderFulfillmentEngine;
