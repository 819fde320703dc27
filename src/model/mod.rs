//! Metadata model

mod elements;
mod resolved;
mod types;

pub use elements::{
    ColumnDescriptor, ExecutableUnit, ParameterDescriptor, ParameterHint, ParameterType, Script,
    StoredProcedure, TableDto, TableTypeDescriptor, TempTable,
};
pub use resolved::{Diagnostics, ResolvedModel, Warning};
pub use types::{SqlDbType, SqlTypeDescriptor};
