pub mod error;
pub mod journal;
pub mod models;
pub mod schemas;
pub mod selector;

pub use error::RcrtError;
pub use models::{
    Breadcrumb, BreadcrumbCreate, BreadcrumbListItem, BreadcrumbUpdate, ContextMatch, Created,
    MatchOp, RequiredSecret, SecretScope, Selector, ToolDescriptor, ToolRequest, ToolResponse,
    ToolStatus,
};
