//! Declarative schema validation.
//!
//! Schemas describe the expected shape of a payload as data ([`schema`]);
//! one generic interpreter ([`validator`]) checks values against them and
//! reports every violation in a single pass. The schemas for each entity
//! the service accepts live in [`entities`].

pub mod entities;
pub mod schema;
pub mod validator;

pub use entities::{
    AccountGroup, ContentPayload, Identifier, MediaUpload, Pagination, Payload, ProxySettings,
    SchedulePost,
};
pub use schema::{ArrayRules, Field, FieldKind, Format, NumberRules, Schema, StringRules};
pub use validator::{validate, validate_as, ValidationErrors, Violation, ROOT_PATH};
