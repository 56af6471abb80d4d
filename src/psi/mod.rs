pub mod section;
pub mod descriptor;
pub mod pat;
pub mod cat;
pub mod pmt;
pub mod nit;
pub mod sdt;
pub mod eit;
pub mod tdt;

pub use section::{Section, SectionReader, TableHeader};
pub use descriptor::{ca_vendor, classify_stream, CaDescriptor, DescriptorIter, StreamCategory};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use cat::{parse_cat, CatSection};
pub use pmt::{parse_pmt, PmtSection, PmtStream};
pub use nit::{parse_nit, NitSection};
pub use sdt::{parse_sdt, SdtSection};
pub use eit::{is_eit, parse_eit, EitSection};
pub use tdt::{parse_rst, parse_tdt_tot, TimeSection};
