//! Network side of the DICOM Upper Layer
//!
//! Per connection, a [`StateMachine`] task owns the transport and the
//! protocol state and a [`Dispatcher`] turns its upcalls into DIMSE
//! exchanges. [`ServiceProvider`] and [`ServiceUser`] wire the two together
//! for the acceptor and requestor sides.

pub mod assembler;
pub mod context;
pub mod cstore;
pub mod dispatcher;
pub mod events;
pub mod provider;
pub mod reader;
pub mod services;
pub mod state;
pub mod state_machine;
pub mod timer;
pub mod tls;
pub mod transport;
pub mod user;

pub use context::{ContextEntry, ContextManager, ContextResult};
pub use dispatcher::{CommandHandler, ConnectionState, Dispatcher, Exchange};
pub use events::{StateEvent, UpcallEvent};
pub use provider::ServiceProvider;
pub use services::{
    QueryHandler, QueryRequest, RetrieveHandler, RetrieveItem, StoreHandler, StoreRequest,
};
pub use state::{Action, Event, State};
pub use state_machine::{AssociationSettings, MachineHandle, StateMachine};
pub use transport::{BoxedTransport, Connector};
pub use user::ServiceUser;
