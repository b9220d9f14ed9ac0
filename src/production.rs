// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use std::collections::{BTreeMap, HashMap};

use enumset::{EnumSet, EnumSetType};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::CostAnalysis;
use crate::database::{Database, EntityId, GoodsId, RecipeId};
use crate::parameters::{self, ModuleConfig, RecipeParameters};
use crate::project::{LinkId, ProjectPage, RowId, TableId};
use crate::solver::{BasisStatus, Constraint, Problem, Variable, DEFAULT_SEEDS};

mod diagnose;
mod flow;

pub use flow::FlowEntry;

/// Values below this are treated as a solved zero.
const SOLUTION_EPSILON: f64 = 1e-9;

/// Returned alongside a successful solve when some rows need more buildings
/// than the user has recorded as built.
pub const BUILT_COUNT_EXCEEDED_MESSAGE: &str =
    "Solution finished, but some recipes require more buildings than are currently built";

/// How a link constrains the balance of its goods.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum LinkAlgorithm {
    /// Production minus consumption must equal the link amount.
    Match,
    /// Producing more than the link amount is allowed.
    AllowOverProduction,
    /// Consuming more than the link amount is allowed.
    AllowOverConsumption,
}

#[derive(EnumSetType, Debug)]
pub enum LinkFlag {
    HasConsumption,
    HasProduction,
    /// The link did not participate as an equality in the last solve.
    NotMatched,
    /// The link was relaxed by the infeasibility diagnosis.
    RecursiveNotMatched,
    /// A nested table pushed an imbalance through this link.
    ChildNotMatched,
}

#[derive(EnumSetType, Debug)]
pub enum RowWarning {
    OverproductionRequired,
    DeadlockCandidate,
    ExceedsBuiltCount,
}

/// A user-declared balance constraint at a given goods inside a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionLink {
    pub goods: GoodsId,
    /// Positive: consumption demand. Negative: surplus supply allowed.
    /// Zero: pure balance.
    pub amount: f64,
    pub algorithm: LinkAlgorithm,
    #[serde(skip)]
    pub flags: EnumSet<LinkFlag>,
    /// Goods per second moved through the link in the last solve.
    #[serde(skip)]
    pub link_flow: f64,
    /// Shadow price of the link constraint in the last solve.
    #[serde(skip)]
    pub dual_value: f64,
    /// Imbalance in goods per second left by the relaxed re-solve; positive
    /// means overproduction was required, negative a deadlock.
    #[serde(skip)]
    pub not_matched_flow: f64,
    /// Rows contributing to this link during the current solve.
    #[serde(skip)]
    pub captured_rows: Vec<RowId>,
}

impl ProductionLink {
    pub fn new(goods: GoodsId, amount: f64) -> Self {
        Self {
            goods,
            amount,
            algorithm: LinkAlgorithm::Match,
            flags: EnumSet::empty(),
            link_flow: 0.0,
            dual_value: 0.0,
            not_matched_flow: 0.0,
            captured_rows: Vec::new(),
        }
    }

    fn clear_outputs(&mut self) {
        self.flags = EnumSet::empty();
        self.link_flow = 0.0;
        self.dual_value = 0.0;
        self.not_matched_flow = 0.0;
        self.captured_rows.clear();
    }
}

/// Resolved link pointers of one row, refreshed each solve.
#[derive(Debug, Clone, Default)]
pub struct RowLinks {
    pub ingredients: Vec<Option<LinkId>>,
    pub products: Vec<Option<LinkId>>,
    pub fuel: Option<LinkId>,
    pub spent_fuel: Option<LinkId>,
}

impl RowLinks {
    fn iter(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.ingredients
            .iter()
            .chain(self.products.iter())
            .chain([&self.fuel, &self.spent_fuel])
            .flatten()
            .copied()
    }
}

/// One recipe entry of a production table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRow {
    pub recipe: RecipeId,
    /// Chosen crafter entity.
    pub entity: Option<EntityId>,
    /// Chosen fuel goods.
    pub fuel: Option<GoodsId>,
    #[serde(default)]
    pub module_config: ModuleConfig,
    /// Fixed temperature-variant choice per ingredient index, for
    /// ingredients accepting several fluid variants.
    #[serde(default)]
    pub variant_picks: BTreeMap<u32, GoodsId>,
    /// Nested table owned by this row.
    pub subgroup: Option<TableId>,
    pub enabled: bool,
    /// When positive, pins the machine count and thereby the solved rate.
    #[serde(default)]
    pub fixed_buildings: f64,
    /// Machine count the user actually built, when recorded.
    #[serde(default)]
    pub built_buildings: Option<f64>,
    #[serde(skip)]
    pub recipes_per_second: f64,
    #[serde(skip)]
    pub warning_flags: EnumSet<RowWarning>,
    #[serde(skip)]
    pub parameters: RecipeParameters,
    #[serde(skip)]
    pub links: RowLinks,
}

impl RecipeRow {
    pub fn new(recipe: RecipeId) -> Self {
        Self {
            recipe,
            entity: None,
            fuel: None,
            module_config: ModuleConfig::default(),
            variant_picks: BTreeMap::new(),
            subgroup: None,
            enabled: true,
            fixed_buildings: 0.0,
            built_buildings: None,
            recipes_per_second: 0.0,
            warning_flags: EnumSet::empty(),
            parameters: RecipeParameters::default(),
            links: RowLinks::default(),
        }
    }

    /// Buildings needed to sustain the solved rate.
    pub fn building_count(&self) -> f64 {
        self.recipes_per_second * self.parameters.recipe_time
    }

    fn clear_outputs(&mut self) {
        self.recipes_per_second = 0.0;
        self.warning_flags = EnumSet::empty();
        self.parameters = RecipeParameters::default();
        self.links = RowLinks::default();
    }
}

/// An ordered list of recipe rows and links; may be nested as the subgroup
/// of a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionTable {
    /// Owning table in the page arena; `None` for the root.
    pub owner: Option<TableId>,
    pub rows: Vec<RecipeRow>,
    pub links: Vec<ProductionLink>,
    /// Goods to local link index, rebuilt by the setup pass.
    #[serde(skip)]
    pub link_map: HashMap<GoodsId, u32>,
    /// Sorted per-table flow, rebuilt after each solve.
    #[serde(skip)]
    pub flow: Vec<FlowEntry>,
    #[serde(skip)]
    pub contains_desired_products: bool,
}

impl ProductionTable {
    pub fn new(owner: Option<TableId>) -> Self {
        Self {
            owner,
            rows: Vec::new(),
            links: Vec::new(),
            link_map: HashMap::new(),
            flow: Vec::new(),
            contains_desired_products: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[error("failed to solve the production table: the formulation contains deadlock loops")]
    DeadlockLoops,
    #[error("failed to solve the production table: numerical errors")]
    NumericalErrors,
    #[error("Unaccounted error: MODEL_{0}")]
    Unaccounted(String),
    #[error("the solver worker failed: {0}")]
    Worker(String),
}

/// Rows and links collected by the setup pass, in traversal order.
#[derive(Debug, Default, PartialEq, Eq)]
struct SolveContext {
    rows: Vec<RowId>,
    links: Vec<LinkId>,
}

/// Pre-pass: recursively collect enabled rows and all links from the root
/// down, clearing stale outputs and rebuilding each table's link map.
fn setup(page: &mut ProjectPage, table_id: TableId, ctx: &mut SolveContext) {
    let table = page.table_mut(table_id);
    table.link_map.clear();
    table.flow.clear();
    table.contains_desired_products = false;
    for (index, link) in table.links.iter_mut().enumerate() {
        link.clear_outputs();
        if link.amount > 0.0 {
            link.flags |= LinkFlag::HasConsumption;
            table.contains_desired_products = true;
        }
        if link.amount < 0.0 {
            link.flags |= LinkFlag::HasProduction;
        }
        table.link_map.insert(link.goods, index as u32);
        ctx.links.push(LinkId {
            table: table_id,
            link: index as u32,
        });
    }

    for row_index in 0..page.table(table_id).rows.len() {
        let row_id = RowId {
            table: table_id,
            row: row_index as u32,
        };
        if !page.row(row_id).enabled {
            clear_row(page, row_id);
            continue;
        }
        page.row_mut(row_id).warning_flags = EnumSet::empty();
        ctx.rows.push(row_id);
        if let Some(subgroup) = page.row(row_id).subgroup {
            setup(page, subgroup, ctx);
        }
    }
}

fn clear_row(page: &mut ProjectPage, row_id: RowId) {
    page.row_mut(row_id).clear_outputs();
    if let Some(subgroup) = page.row(row_id).subgroup {
        clear_table(page, subgroup);
    }
}

fn clear_table(page: &mut ProjectPage, table_id: TableId) {
    let table = page.table_mut(table_id);
    table.flow.clear();
    table.contains_desired_products = false;
    for link in &mut table.links {
        link.clear_outputs();
    }
    for row_index in 0..page.table(table_id).rows.len() {
        clear_row(
            page,
            RowId {
                table: table_id,
                row: row_index as u32,
            },
        );
    }
}

/// Resolve a goods to a link by walking the owner chain from `start`.
fn resolve_link(page: &ProjectPage, start: TableId, goods: GoodsId) -> Option<LinkId> {
    let mut table_id = start;
    loop {
        let table = page.table(table_id);
        if let Some(&index) = table.link_map.get(&goods) {
            return Some(LinkId {
                table: table_id,
                link: index,
            });
        }
        table_id = table.owner?;
    }
}

fn capture(page: &mut ProjectPage, link_id: LinkId, flag: LinkFlag, row_id: RowId) {
    let link = page.link_mut(link_id);
    link.flags |= flag;
    if !link.captured_rows.contains(&row_id) {
        link.captured_rows.push(row_id);
    }
}

/// Wire one row's products, ingredients, fuel, and spent fuel into the link
/// constraints. Multiple contributions from the same row to the same link
/// accumulate.
fn wire_row(
    db: &Database,
    page: &mut ProjectPage,
    row_id: RowId,
    var: Variable,
    problem: &mut Problem,
    constraints: &BTreeMap<LinkId, Constraint>,
) {
    let link_root = page.link_root(row_id);
    let params = page.row(row_id).parameters;
    let fuel = page.row(row_id).fuel;
    let variant_picks = page.row(row_id).variant_picks.clone();
    let recipe = db.recipe(page.row(row_id).recipe);

    let mut links = RowLinks {
        ingredients: vec![None; recipe.ingredients.len()],
        products: vec![None; recipe.products.len()],
        fuel: None,
        spent_fuel: None,
    };

    for (index, product) in recipe.products.iter().enumerate() {
        if let Some(link_id) = resolve_link(page, link_root, product.goods) {
            let amount = product.amount_with_productivity(params.productivity);
            problem.add_coefficient(constraints[&link_id], var, amount);
            capture(page, link_id, LinkFlag::HasProduction, row_id);
            links.products[index] = Some(link_id);
        }
    }

    for (index, ingredient) in recipe.ingredients.iter().enumerate() {
        let goods = ingredient.resolve_variant(variant_picks.get(&(index as u32)).copied());
        if let Some(link_id) = resolve_link(page, link_root, goods) {
            problem.add_coefficient(constraints[&link_id], var, -ingredient.amount);
            capture(page, link_id, LinkFlag::HasConsumption, row_id);
            links.ingredients[index] = Some(link_id);
        }
    }

    let fuel_per_recipe = params.fuel_usage_per_second_per_recipe;
    if let Some(fuel) = fuel {
        if fuel_per_recipe.is_finite() {
            if let Some(link_id) = resolve_link(page, link_root, fuel) {
                problem.add_coefficient(constraints[&link_id], var, -fuel_per_recipe);
                capture(page, link_id, LinkFlag::HasConsumption, row_id);
                links.fuel = Some(link_id);
            }
            if let Some(spent) = db.goods(fuel).fuel_result() {
                if let Some(link_id) = resolve_link(page, link_root, spent) {
                    problem.add_coefficient(constraints[&link_id], var, fuel_per_recipe);
                    capture(page, link_id, LinkFlag::HasProduction, row_id);
                    links.spent_fuel = Some(link_id);
                }
            }
        }
    }

    page.row_mut(row_id).links = links;
}

/// Objective coefficient of a row: cost-analysis value of everything the
/// recipe consumes, plus positive-cost product and spent-fuel terms as
/// additions, so cheap by-product routes cannot zero out the objective.
fn recipe_base_cost(db: &Database, costs: &CostAnalysis, row: &RecipeRow) -> f64 {
    let recipe = db.recipe(row.recipe);
    let mut base = 0.0;
    for ingredient in &recipe.ingredients {
        let cost = costs.cost(ingredient.goods);
        if cost.is_finite() && cost > 0.0 {
            base += cost * ingredient.amount;
        }
    }
    for product in &recipe.products {
        let cost = costs.cost(product.goods);
        if cost.is_finite() && cost > 0.0 {
            base += cost * product.amount;
        }
    }
    let fuel_per_recipe = row.parameters.fuel_usage_per_second_per_recipe;
    if let Some(fuel) = row.fuel {
        if fuel_per_recipe.is_finite() {
            let cost = costs.cost(fuel);
            if cost.is_finite() && cost > 0.0 {
                base += cost * fuel_per_recipe;
            }
            if let Some(spent) = db.goods(fuel).fuel_result() {
                let cost = costs.cost(spent);
                if cost.is_finite() && cost > 0.0 {
                    base += cost * fuel_per_recipe;
                }
            }
        }
    }
    base
}

/// Solve a page's root table: one LP over every enabled row and link.
///
/// Returns `Ok(None)` on a clean solve, `Ok(Some(message))` when the solve
/// succeeded but some rows exceed their recorded building count, and an
/// error when the model is terminally infeasible.
pub fn solve_page(
    db: &Database,
    costs: &CostAnalysis,
    page: &mut ProjectPage,
) -> Result<Option<String>, SolveError> {
    let mut ctx = SolveContext::default();
    setup(page, ProjectPage::ROOT, &mut ctx);
    debug!(
        "production setup: {} rows, {} links",
        ctx.rows.len(),
        ctx.links.len()
    );

    for &row_id in &ctx.rows {
        let row = page.row(row_id);
        let params = parameters::calculate(
            db,
            row.recipe,
            row.entity,
            row.fuel,
            &row.module_config,
            &page.settings,
        );
        page.row_mut(row_id).parameters = params;
    }

    let mut problem = Problem::new("production-table");
    let vars: Vec<Variable> = ctx
        .rows
        .iter()
        .map(|&row_id| {
            let row = page.row(row_id);
            if row.fixed_buildings > 0.0 && row.parameters.recipe_time > 0.0 {
                let rate = row.fixed_buildings / row.parameters.recipe_time;
                problem.make_var(rate, rate)
            } else {
                problem.make_var(0.0, f64::INFINITY)
            }
        })
        .collect();

    let mut constraints: BTreeMap<LinkId, Constraint> = BTreeMap::new();
    for &link_id in &ctx.links {
        let link = page.link(link_id);
        let (lb, ub) = match link.algorithm {
            LinkAlgorithm::Match => (link.amount, link.amount),
            LinkAlgorithm::AllowOverProduction => (link.amount, f64::INFINITY),
            LinkAlgorithm::AllowOverConsumption => (f64::NEG_INFINITY, link.amount),
        };
        constraints.insert(link_id, problem.make_constraint(lb, ub));
    }

    for (index, &row_id) in ctx.rows.iter().enumerate() {
        wire_row(db, page, row_id, vars[index], &mut problem, &constraints);
    }

    // Links that never got wired on one side cannot constrain anything;
    // relax them. Links with neither side are deleted after the solve.
    let mut unconnected: Vec<LinkId> = Vec::new();
    for &link_id in &ctx.links {
        let link = page.link_mut(link_id);
        let has_production = link.flags.contains(LinkFlag::HasProduction);
        let has_consumption = link.flags.contains(LinkFlag::HasConsumption);
        if !(has_production && has_consumption) {
            link.flags |= LinkFlag::NotMatched;
            problem.set_constraint_bounds(
                constraints[&link_id],
                f64::NEG_INFINITY,
                f64::INFINITY,
            );
            if !has_production && !has_consumption {
                unconnected.push(link_id);
            }
        }
    }

    for (index, &row_id) in ctx.rows.iter().enumerate() {
        let base = recipe_base_cost(db, costs, page.row(row_id));
        problem.set_objective_coefficient(vars[index], base);
    }

    let mut solution = problem.solve_with_seeds(DEFAULT_SEEDS);
    if !solution.status().is_feasible() {
        warn!(
            "production solve failed with {:?}; running infeasibility diagnosis",
            solution.status()
        );
        solution = diagnose::diagnose_and_relax(
            costs,
            page,
            &ctx.rows,
            &ctx.links,
            &mut problem,
            &constraints,
        )?;
    }

    for (index, &row_id) in ctx.rows.iter().enumerate() {
        let value = solution.value(vars[index]);
        page.row_mut(row_id).recipes_per_second =
            if value.abs() < SOLUTION_EPSILON { 0.0 } else { value };
    }
    for &link_id in &ctx.links {
        let ctr = constraints[&link_id];
        let dual = solution.dual(ctr);
        let basic = solution.basis_status(ctr) == BasisStatus::Basic;
        let link = page.link_mut(link_id);
        link.dual_value = dual;
        if basic && (link.not_matched_flow != 0.0 || link.algorithm != LinkAlgorithm::Match) {
            link.flags |= LinkFlag::NotMatched;
        }
    }

    flow::aggregate(db, page, ProjectPage::ROOT);

    let exceeded = check_built_count_exceeded(page, ProjectPage::ROOT);

    purge_links(page, unconnected);

    if exceeded {
        Ok(Some(BUILT_COUNT_EXCEEDED_MESSAGE.to_string()))
    } else {
        Ok(None)
    }
}

/// Run [`solve_page`] on a worker thread, converting a solver panic into an
/// error instead of unwinding into the caller. The calling thread blocks
/// until the worker hands the page back; UI thread affinity is the
/// caller's concern.
pub fn solve_page_detached(
    db: &Database,
    costs: &CostAnalysis,
    page: &mut ProjectPage,
) -> Result<Option<String>, SolveError> {
    std::thread::scope(|scope| {
        let handle = scope.spawn(|| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                solve_page(db, costs, page)
            }))
        });
        match handle.join() {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SolveError::Worker(panic_message(&panic))),
            Err(panic) => Err(SolveError::Worker(panic_message(&panic))),
        }
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Recursively flag rows needing more buildings than are recorded as built.
/// A row also inherits the flag when its subgroup contains one.
fn check_built_count_exceeded(page: &mut ProjectPage, table_id: TableId) -> bool {
    let mut any = false;
    for row_index in 0..page.table(table_id).rows.len() {
        let row_id = RowId {
            table: table_id,
            row: row_index as u32,
        };
        let mut exceeded = false;
        if let Some(subgroup) = page.row(row_id).subgroup {
            exceeded |= check_built_count_exceeded(page, subgroup);
        }
        let row = page.row(row_id);
        if let Some(built) = row.built_buildings {
            if row.enabled && row.building_count() > built + SOLUTION_EPSILON {
                exceeded = true;
            }
        }
        if exceeded {
            page.row_mut(row_id).warning_flags |= RowWarning::ExceedsBuiltCount;
            any = true;
        }
    }
    any
}

/// Remove links that had neither production nor consumption, fixing up the
/// link indexes held by rows in the affected tables.
fn purge_links(page: &mut ProjectPage, mut unconnected: Vec<LinkId>) {
    if unconnected.is_empty() {
        return;
    }
    unconnected.sort();
    let mut by_table: BTreeMap<TableId, Vec<u32>> = BTreeMap::new();
    for link_id in unconnected {
        by_table.entry(link_id.table).or_default().push(link_id.link);
    }

    for (table_id, removed) in by_table {
        for &index in removed.iter().rev() {
            page.table_mut(table_id).links.remove(index as usize);
        }
        let table = page.table_mut(table_id);
        table.link_map.clear();
        for (index, link) in table.links.iter().enumerate() {
            table.link_map.insert(link.goods, index as u32);
        }

        let shift = |link_id: &mut Option<LinkId>| {
            if let Some(id) = link_id {
                if id.table == table_id {
                    if removed.binary_search(&id.link).is_ok() {
                        *link_id = None;
                    } else {
                        let dropped = removed.iter().filter(|&&r| r < id.link).count() as u32;
                        id.link -= dropped;
                    }
                }
            }
        };
        for table in &mut page.tables {
            for row in &mut table.rows {
                row.links.ingredients.iter_mut().for_each(&shift);
                row.links.products.iter_mut().for_each(&shift);
                shift(&mut row.links.fuel);
                shift(&mut row.links.spent_fuel);
            }
            for entry in &mut table.flow {
                let mut link = entry.link;
                shift(&mut link);
                entry.link = link;
            }
        }
    }
}
