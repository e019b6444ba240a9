pub mod class;
pub mod course;
pub mod enrollment;
pub mod learner;
pub mod tenant;

pub use class::{ClassCohort, Level};
pub use course::Course;
pub use enrollment::EnrollmentRecord;
pub use learner::Learner;
pub use tenant::Tenant;
