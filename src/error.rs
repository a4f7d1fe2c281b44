use snafu::Snafu;

use crate::hal::ClientInstance;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{} called with a null output pointer", accessor))]
    NullPointer { accessor: &'static str },

    #[snafu(display("{} client has no recorded lease", instance))]
    NoLease { instance: ClientInstance },

    #[snafu(display("{} client lease has expired", instance))]
    LeaseExpired { instance: ClientInstance },

    #[snafu(display("{} client lease carries no router", instance))]
    NoRouter { instance: ClientInstance },

    #[snafu(display(
        "Interface name '{}' does not fit a {} byte buffer",
        name,
        capacity
    ))]
    IfnameTooLong { name: String, capacity: usize },

    #[snafu(display("Snapshot store error: {}", message))]
    Store { message: String },

    #[snafu(display("No DHCPv4 client provider available: {}", message))]
    Unavailable { message: String },

    #[snafu(display("{} panicked", accessor))]
    Panicked { accessor: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn store(error: anyhow::Error) -> Error {
        Error::Store {
            message: format!("{error:#}"),
        }
    }
}
