pub mod controller;
pub mod meta;
pub mod rle;
pub mod run;
pub mod stats;
pub mod view;

pub use meta::VariantMeta;
pub use rle::RleEncoder;
pub use run::Run;
pub use twk_core::width::Width;
pub use view::GenotypeView;
