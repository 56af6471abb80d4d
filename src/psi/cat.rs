// psi/cat.rs
//! Conditional Access Table (table_id 0x01).
use crate::constants::table_id;
use crate::error::TsError;
use crate::psi::descriptor::{ca_descriptors, CaDescriptor};
use crate::psi::section::{SectionReader, TableHeader};

#[derive(Debug, Clone)]
pub struct CatSection {
    pub header: TableHeader,
    /// EMM streams announced by the CA descriptors.
    pub ca: Vec<CaDescriptor>,
}

pub fn parse_cat(section: &[u8]) -> Result<CatSection, TsError> {
    let sec = SectionReader::new(section)?.expect_table(&[table_id::CAT])?;
    Ok(CatSection { header: sec.header, ca: ca_descriptors(sec.body) })
}
