//! ResourceService: generic resource operations over a `ResourceStore`.

mod decimal;
mod ledger;
mod residents;
mod resource;
mod validation;

pub use ledger::{format_cents, to_cents, LedgerTotals, LEDGER, LEDGER_ENTRY};
pub use residents::RESIDENT;
pub use resource::{RelatedReference, ResourceService};
pub use validation::RequestValidator;
