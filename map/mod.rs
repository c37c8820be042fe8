pub mod pca;
pub use pca::{
    Centroid, MergedTable, PcaError, PrincipalComponents, ProjectedRow, StructureSummary,
    analyze_structure, principal_component_table,
};
