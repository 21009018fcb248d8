//! IPC bridge for parent-worker communication.
//!
//! This module provides the wire protocol and codecs spoken between the
//! parent handle and the worker subprocess.
//!
//! # Architecture
//!
//! - **protocol**: Instruction bytes and response literals
//! - **codec**: Framing codecs for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
