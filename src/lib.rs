mod cost;
mod database;
mod milestones;
mod parameters;
mod production;
mod project;
mod search;
mod share;
mod solver;

#[cfg(test)]
mod test_util;

pub use cost::{CostAnalysis, COST_LOWER_LIMIT};
pub use database::{
    Accumulator, Beacon, Belt, Container, Crafter, Database, DatabaseBuilder, DatabaseError,
    DatabaseKey, EnergyKind, Entity, EntityEnergy, EntityId, Fluid, Goods, GoodsId, GoodsKind,
    Ingredient, Inserter, Item, Mapping, ModuleEffect, ModuleSpec, ObjectId, ObjectRef, Product,
    Recipe, RecipeFlag, RecipeId, Special, Technology, TechnologyId,
};
pub use milestones::{Accessibility, FullAccess};
pub use parameters::{
    calculate, module_accepted, BeaconConfig, ModuleConfig, ModuleInstall, RecipeParameters,
};
pub use production::{
    solve_page, solve_page_detached, FlowEntry, LinkAlgorithm, LinkFlag, ProductionLink,
    ProductionTable, RecipeRow, RowLinks, RowWarning, SolveError, BUILT_COUNT_EXCEEDED_MESSAGE,
};
pub use project::{LinkId, ProjectPage, ProjectSettings, RowId, TableId};
pub use search::{find_link, has_spent_fuel, table_matches, SearchQuery};
pub use share::{decode_page, encode_page, ShareStringError, Version, SHARE_VERSION};
pub use solver::{BasisStatus, Constraint, Problem, Solution, SolveStatus, Variable};
