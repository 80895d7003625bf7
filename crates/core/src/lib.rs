// gwchat Core - 核心数据模型
//!
//! 包含：
//! - model: 消息、内容块、标记与队列条目
//! - role: 角色归一化
//! - extract: 文本/思考/工具卡片提取与缓存
//! - attachment: 图片附件
//! - config: 配置加载
//! - error: 错误类型

pub mod attachment;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod role;

pub use attachment::*;
pub use config::*;
pub use error::*;
pub use extract::*;
pub use model::*;
pub use role::*;
