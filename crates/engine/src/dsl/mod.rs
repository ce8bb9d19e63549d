//! Run-command DSL.
//!
//! Commands are composed from an action, a set of categories and input data,
//! then executed by a [`CommandRuntime`]. Supported combinations:
//!
//! | Categories | Actions | Effect |
//! |---|---|---|
//! | jiva + volume | delete | resolve the delete link from `<url>/v1/volumes` and DELETE it |
//! | cstor + snapshot | create, delete | snapshot RPC to `<ip>:7777` |
//! | cstor + volume | update | resize RPC to `<ip>:7777` |
//! | http | any | verb against `url` or `url/name` |

mod command;
mod exec;
mod messages;
mod store;
mod transport;

pub use command::{
    Category, CommandTarget, ERR_EMPTY_CATEGORY, ERR_INVALID_CATEGORY, ERR_NOT_SUPPORTED_ACTION,
    ERR_NOT_SUPPORTED_CATEGORY, RunAction, RunCommand, RunCommandResult, SKIP_EXECUTION,
};
pub use exec::CommandRuntime;
pub use messages::{Message, MessageKind, Messages};
pub use store::{DEBUG_KEY, ERR_FAILED_CONDITION, ERROR_KEY, KvStore, RESULT_KEY, ROOT_CAUSE_KEY, run_stored};
pub use transport::{HttpReply, HttpTransport, ReqwestTransport, TcpVolumeConnector, VolumeConnector};
