//! `groundtex-hal` – world backends and operator input.
//!
//! # Modules
//!
//! - [`sim`] – [`SimWorld`], an in-process world that accepts teleport
//!   requests and publishes camera, calibration and pose feeds.
//! - [`teleop`] – [`KeyboardController`], which turns recent key presses
//!   into body-frame velocity commands.

pub mod sim;
pub mod teleop;

pub use sim::{SimWorld, SimWorldConfig};
pub use teleop::KeyboardController;
