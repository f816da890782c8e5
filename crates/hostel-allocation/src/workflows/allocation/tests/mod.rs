mod common;
mod routing;
mod transaction;
