pub mod catalogue;
pub mod decision;
pub mod job;
pub mod lenient;
pub mod loaders;
pub mod proposal;
pub mod response;

pub use catalogue::{AuxiliaryConfig, Catalogue, CatalogueEntry, Category, SpecialCodeTable};
pub use decision::{CanonicalCode, CodingDecision, Decision, NewCodeRef};
pub use job::{CodingJob, JobOutcome, JobStats, JobStatus};
pub use loaders::{load_job, parse_job};
pub use proposal::{ClassificationProposal, ClassifierReply, CodeMatch, ProposalOutcome};
pub use response::RawResponse;
