//! # imgui-ash-showcase
//!
//! Two small [imgui-rs][imgui-rs] programs sharing one library:
//!
//! - `vulkan-showcase` presents the imgui showcase windows through Vulkan using [Ash][ash].
//! - `gles3-triangles` draws a ring of instanced triangles with OpenGL ES 3 and exposes its
//!   uniforms as imgui sliders.
//!
//! ## How it works
//!
//! - Bring-up
//!
//! [`VulkanContext`] creates the instance, picks a physical device (the first discrete gpu, or
//! the first device), the first graphics queue family, the logical device and a descriptor pool
//! shared with the gui renderer.
//!
//! - Swapchain
//!
//! [`WindowData`] owns the surface, the swapchain and one [`Frame`] per swapchain image (command
//! pool, command buffer, fence, image view, framebuffer) plus one pair of semaphores per image.
//! It is rebuilt when the window is resized or the presentation engine reports it out of date.
//!
//! - Frames
//!
//! [`render_frame`] acquires an image, waits the fence of that image, records the render pass
//! and the gui draw commands and submits them. [`present_frame`] hands the image back to the
//! presentation engine. Index and rebuild bookkeeping lives in [`FrameRing`].
//!
//! - Gui renderer
//!
//! [`Renderer`] replays imgui draw data in a command buffer supplied by the application. It does
//! not submit anything to the gpu; the fonts atlas upload is recorded with
//! [`Renderer::cmd_upload_fonts`] and submitted by [`upload_fonts`].
//!
//! ## Features
//!
//! Build toggles are cargo features resolved into constants at compile time.
//!
//! - `validation`: enables `VK_LAYER_KHRONOS_validation` and logs its messages.
//! - `vsync`: forces the FIFO present mode. Without it MAILBOX, then IMMEDIATE, then FIFO is used.
//! - `docking`: enables imgui docking and multi-viewports.
//! - `free`: disables vsync in the GLES demo.
//!
//! ```sh
//! cargo run --bin vulkan-showcase --features validation
//! cargo run --bin gles3-triangles
//! ```
//!
//! [imgui-rs]: https://github.com/imgui-rs/imgui-rs
//! [ash]: https://github.com/ash-rs/ash

mod context;
mod error;
mod frame;
pub mod gles;
mod renderer;
mod swapchain;
mod system;
mod upload;

pub use context::*;
pub use error::*;
pub use frame::*;
pub use renderer::*;
pub use swapchain::*;
pub use system::*;
pub use upload::*;

/// Convenient return type for function that can return a [`RendererError`].
pub type RendererResult<T> = Result<T, RendererError>;

/// Validation layer and diagnostic messenger are enabled.
pub const VALIDATION: bool = cfg!(feature = "validation");

/// FIFO is the only present mode candidate.
pub const VSYNC: bool = cfg!(feature = "vsync");

/// Imgui docking and multi-viewports are enabled.
pub const DOCKING: bool = cfg!(feature = "docking");

/// The GLES demo swaps without waiting for vertical blank.
pub const FREE_RUNNING: bool = cfg!(feature = "free");
