//! Concrete execution backends.

mod aiservice;
mod codecli;
mod resolver;
mod rules;

pub use aiservice::{parse_response, AiServiceBackend};
pub use codecli::{resolve_executable, CliKind, CodeCliBackend};
pub use resolver::{is_http_backend, DefaultBackendResolver};
pub use rules::{RulesBackend, RULES_BACKEND_NAME};
