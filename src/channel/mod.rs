//! Workspace channels
//!
//! - Workspace, app instance and channel records
//! - 1:1 workspace/channel mapping with snapshot semantics
//! - Context bus with listener registry, delivery and membership

pub mod bus;
pub mod mapper;
pub mod model;

pub use bus::{ContextListenerDescriptor, DeliveryReport, DeliverySummary, WorkspaceContextBus};
pub use mapper::WorkspaceChannelMapper;
pub use model::{
    AppInstanceModel, ChannelInfo, ChannelMember, ChannelModel, DisplayMetadata, WorkspaceModel,
    WORKSPACE_CHANNEL_TYPE,
};
