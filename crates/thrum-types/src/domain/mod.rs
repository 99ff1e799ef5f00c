mod agent;
mod group;
mod session;
mod subscription;

pub use agent::{Agent, AgentKind};
pub use group::{Group, GroupMember, MemberType};
pub use session::{FileChange, Session, WorkContext};
pub use subscription::{Subscription, SubscriptionFilter, SyncCheckpoint};
