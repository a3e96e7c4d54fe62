pub mod attr_expr;
pub mod node;
pub mod registry;

pub use attr_expr::{AttrExpr, AttrExprError};
pub use node::{Node, NodeStatus};
pub use registry::NodeRegistry;
