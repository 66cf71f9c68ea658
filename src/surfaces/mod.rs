pub mod page;
pub mod status;

pub use page::{PageNotice, PageRenderer, PageRequest, PageSurface};
pub use status::{
    PermissionPrompt, PunishmentView, StatusMode, StatusSurface, StatusView, SurfaceContext,
};
