//! # brainHat Server Library
//!
//! The concurrent workers of a brainHat node: a headless board computer attached to a
//! biosignal acquisition board that streams and records data and answers on the network.
//!
//! ## Overview
//!
//! Every long running part of the node is a [`worker::Worker`] driven by a
//! [`worker::CancellableThread`]. The thread owns the worker's resources and guarantees
//! that once `cancel` returns, the run loop has exited and its socket or board session
//! is released.
//!
//! ## Architecture
//!
//! - **[`tcp::TcpRequestServer`]**: accepts one client at a time, reads one request line
//!   and hands it to a [`tcp::RequestHandler`]
//! - **[`multicast::UdpMulticastBroadcaster`]**: sends the datagram of a
//!   [`multicast::Broadcast`] to a multicast group on a fixed period
//! - **[`command::CommandServer`]**: the `keyboard`, `loglevel` and `ping` commands
//! - **[`status::StatusBroadcaster`]**: the `networkstatus` datagram, one broadcaster per
//!   network interface
//! - **[`acquisition::AcquisitionThread`]**: polls a [`acquisition::BoardSession`],
//!   reconnects a stalled board and feeds the [`datalog::DataLog`]
//!
//! [`context::Node`] starts all of them and stops them in a fixed order.
//!
//! ## Starting a Command Server
//!
//! ```ignore
//! use hat_server::command::{CommandHandler, CommandServer};
//! use hat_server::tcp::Builder;
//!
//! let config = Builder::new().addr("0.0.0.0:50090".parse()?).config();
//! let mut server = CommandServer::new(CommandHandler::default(), config);
//! server.start()?;
//! // ...
//! server.cancel();
//! ```
//!
//! ## Board Backends
//!
//! Hardware access stays outside this crate. A backend implements
//! [`acquisition::BoardSession`] and is created through a [`acquisition::SessionFactory`]
//! every time the acquisition thread (re)connects:
//!
//! ```ignore
//! use hat_server::acquisition::{AcquisitionThread, BoardSession, BoardStatus};
//! use std::sync::Arc;
//!
//! let status = Arc::new(BoardStatus::new(0));
//! let worker = AcquisitionThread::new(
//!     || Ok(Box::new(MyBoard::open("/dev/ttyUSB0")) as Box<dyn BoardSession>),
//!     status,
//! );
//! ```
//!
//! ## Error Handling
//!
//! A worker that cannot acquire its resources reports [`error::Error`] from `start` and
//! stays idle; no failure of one worker stops another. Board failures are
//! [`acquisition::BoardError`] values and are recovered by the acquisition thread itself.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. The `loglevel` command changes the
//! maximum level at runtime through [`command::LogControl`].
pub mod acquisition;
pub mod command;
pub mod context;
pub mod datalog;
pub mod error;
pub mod indicator;
pub mod multicast;
pub mod netif;
pub mod status;
pub mod tcp;
pub mod worker;

pub use error::Error;
pub use worker::{CancelToken, CancellableThread, ThreadState, Worker};
