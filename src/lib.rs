pub mod builder;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod fs_util;
pub mod http;
pub mod liftover;
pub mod lookup;
pub mod normalize;
pub mod output;
pub mod snapshot;
pub mod store;
