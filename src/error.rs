use ash::vk;
use imgui::TextureId;
use thiserror::Error;

/// Errors of the imgui Vulkan renderer.
#[derive(Debug, Error)]
pub enum RendererError {
    /// Errors coming from calls to Vulkan functions.
    #[error("A Vulkan error occured: {0}")]
    Vulkan(#[from] vk::Result),

    /// Io errors.
    #[error("A io error occured: {0}")]
    Io(#[from] std::io::Error),

    /// Initialization errors.
    #[error("An error occured when initializing the renderer: {0}")]
    Init(String),

    /// Texture lookup error.
    #[error("Bad texture ID: {}", .0.id())]
    BadTexture(TextureId),

    /// Allocator error
    #[error("A error occured when using the allocator: {0}")]
    Allocator(String),

    /// Renderer was used after `destroy`.
    #[error("The renderer was already destroyed")]
    Destroyed,
}

/// Errors of the demo applications and of the presentation subsystem.
#[derive(Debug, Error)]
pub enum AppError {
    /// Errors coming from calls to Vulkan functions.
    #[error("A Vulkan error occured: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader library could not be found or loaded.
    #[error("Vulkan is not available: {0}")]
    Loading(#[from] ash::LoadingError),

    /// The windowing library could not be initialized.
    #[error("The windowing system is not available: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("Failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("Window operation failed: {0}")]
    External(#[from] winit::error::ExternalError),

    #[error("No Vulkan physical device found")]
    NoPhysicalDevice,

    #[error("No queue family with graphics support")]
    NoGraphicsQueue,

    #[error("Selected physical device cannot present to the window surface")]
    NoSurfaceSupport,

    #[error("GL context error: {0}")]
    Glutin(#[from] glutin::error::Error),

    /// Shader, program or GL object errors.
    #[error("GL error: {0}")]
    Gl(String),

    #[error(transparent)]
    Renderer(#[from] RendererError),
}

impl AppError {
    /// Returns true when the error means the platform lacks a window system or a
    /// Vulkan loader, rather than a failure while talking to either of them.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Loading(_) | Self::EventLoop(_))
    }
}

/// Convenient return type for function that can return a [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_platform_pieces_are_unavailable() {
        assert!(!AppError::NoPhysicalDevice.is_unavailable());
        assert!(!AppError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_unavailable());
        assert!(!AppError::Renderer(RendererError::Destroyed).is_unavailable());
    }

    #[test]
    fn renderer_errors_keep_their_message() {
        let error = AppError::from(RendererError::Init("no fonts".into()));
        assert_eq!(
            error.to_string(),
            "An error occured when initializing the renderer: no fonts"
        );
    }
}
