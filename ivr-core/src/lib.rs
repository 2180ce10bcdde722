// ivr-core/src/lib.rs
pub mod buildlist;
pub mod buildnumber;
pub mod cancel;
pub mod listing;
pub mod pool;
pub mod publish;
pub mod report;
pub mod resolve;
pub mod retrieve;
pub mod session;
pub mod store;

pub use buildlist::{build_list, BuildListOptions};
pub use buildnumber::{BuildNumber, BuildNumberOptions};
pub use cancel::CancelSignal;
pub use listing::ModuleFilter;
pub use publish::{publish, PublishOptions};
pub use report::ResolutionReport;
pub use resolve::{ResolveOptions, ResolvedGraph, ResolvedNode, Resolver};
pub use retrieve::{cachepath, join_cachepath, retrieve, RetrieveOptions, RetrieveReport, Strictness};
pub use session::Session;
pub use store::{CacheEntry, CacheStore, EvictOptions};
