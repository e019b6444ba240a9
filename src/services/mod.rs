pub mod registration_plan;
pub mod registration_service;
pub mod tenant_service;

pub use registration_plan::{
    CourseId, CourseRef, DuplicationMode, HeldElsewhere, LearnerId, LearnerRef, RegistrationPlan, RegistrationScope,
};
pub use registration_service::{RegistrationError, RegistrationOutcome, RegistrationService};
pub use tenant_service::{PgTenantDirectory, TenantContext, TenantDirectory, TenantService};
