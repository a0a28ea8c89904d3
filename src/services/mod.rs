// 服务层模块
pub mod pagination;
pub mod progress;
pub mod raw_api;
pub mod transport;
pub mod vxcube_api;

pub use progress::{ProgressConnector, ProgressEvent, ProgressSocket, TungsteniteConnector};
pub use raw_api::{Endpoint, RawApi};
pub use transport::{HttpTransport, ReqwestTransport};
pub use vxcube_api::{AnalysisFilter, AnalysisRequest, SampleFilter, VxCubeApi};
