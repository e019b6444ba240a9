pub mod registration;

pub use registration::{duplicate_registration, register_courses, registration_terms, unregister_courses};
