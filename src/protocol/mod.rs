//! DICOM wire formats
//!
//! This module contains the Upper Layer PDU codec, the DIMSE command set
//! codec and a minimal data set element codec.

pub mod dataset;
pub mod dimse;
pub mod pdu;
pub mod uid;

// Re-export commonly used types
pub use dimse::{CommandField, DimseCommand, Status, SubOperations};
pub use pdu::{Pdu, PresentationDataValue, SubItem};
