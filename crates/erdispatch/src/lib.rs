//! `erdispatch` - Emergency call dispatch between paramedics and hospitals
//!
//! A paramedic raises a call for a patient; the symptom is classified into
//! medical departments by a generative model, matching hospitals are found
//! inside an expanding search radius, and the call is broadcast to all of
//! them. The first hospital to accept wins; the others see the call vanish
//! from their pending view. The accepting hospital later completes the call,
//! which archives it.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod ai;
pub mod cli;
pub mod config;
pub mod department;
pub mod desk;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod history;
pub mod logging;
pub mod matching;
pub mod model;
pub mod store;

pub use ai::{GeminiClient, GenerativeModel};
pub use config::Config;
pub use department::Department;
pub use desk::HospitalDesk;
pub use dispatch::{CallOutcome, Dispatcher};
pub use error::{Error, Result};
pub use geo::GeoPoint;
pub use logging::init_logging;
pub use model::{CallStatus, CompletedCase, EmergencyCall, Hospital, PatientInfo};
pub use store::{CallQuery, Store, Subscription, SubscriptionSet};
