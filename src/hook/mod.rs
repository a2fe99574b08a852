// Hook module - interception of the host's presentation flow
//
// dispatch  : hooked proc-address resolvers and the six intercepted calls
// overlay   : per-device overlay state driven by those calls
// registry  : handle-keyed maps the hooks look their state up in
// diagnostics: sampled per-frame logging

pub mod diagnostics;
pub mod dispatch;
pub mod overlay;
pub mod registry;

pub use diagnostics::SampledCounter;
pub use dispatch::{install, install_with_assets, is_tracked, uninstall, with_device};
pub use overlay::OverlayHook;
pub use registry::Registry;
