// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use std::collections::HashMap;

use itertools::Itertools;
use log::{info, warn};

use crate::database::{
    Database, EnergyKind, GoodsId, GoodsKind, Mapping, ObjectId, Recipe, RecipeId,
};
use crate::milestones::Accessibility;
use crate::project::ProjectSettings;
use crate::solver::{Constraint, Problem, Variable};

/// Costs may go slightly negative so the solver can price sinks; this is
/// the floor.
pub const COST_LOWER_LIMIT: f64 = -10.0;
const COST_LIMIT_WHEN_GENERATES_ON_MAP: f64 = 1e4;
const COST_PER_SECOND: f64 = 0.1;
const MIN_CRAFTER_SIZE: usize = 2;
const COST_PER_INGREDIENT_PER_SIZE: f64 = 0.04;
const COST_PER_PRODUCT_PER_SIZE: f64 = 0.02;
const COST_PER_MJ: f64 = 0.1;
const COST_PER_ITEM: f64 = 0.02;
const COST_PER_FLUID: f64 = 0.0005;
const COST_PER_POLLUTION: f64 = 0.01;
const MINING_MAX_DENSITY_FOR_PENALTY: f64 = 2000.0;
const MINING_MAX_EXTRA_PENALTY_FOR_RARITY: f64 = 10.0;

const WASTE_EPSILON: f64 = 1e-9;

/// Global cost model: one LP over every obtainable goods, solved once per
/// mod pack (twice when a milestone-restricted view is requested). Plain
/// value; callers hold the instances they need.
#[derive(Debug)]
pub struct CostAnalysis {
    cost: Mapping<ObjectId, f64>,
    goods_cost: Mapping<GoodsId, f64>,
    flow: Mapping<ObjectId, f64>,
    recipe_cost: Mapping<RecipeId, f64>,
    recipe_product_cost: Mapping<RecipeId, f64>,
    recipe_waste_percentage: Mapping<RecipeId, f64>,
    important_items: Vec<GoodsId>,
    has_warning: bool,
}

/// The single fuel charged to a recipe's cost constraint: only defined when
/// every fuel-burning crafter agrees on one fuel goods with a usable fuel
/// value. The amount is fuel units per craft; the minimum across crafters
/// wins.
fn single_fuel(
    db: &Database,
    recipe: &Recipe,
    accessible: &dyn Fn(ObjectId) -> bool,
) -> Option<(GoodsId, f64)> {
    let mut result: Option<(GoodsId, f64)> = None;
    for &crafter_id in &recipe.crafters {
        let entity = db.entity(crafter_id);
        if !accessible(entity.object) {
            continue;
        }
        let Some(energy) = &entity.energy else {
            continue;
        };
        match energy.kind {
            EnergyKind::Void | EnergyKind::Electric | EnergyKind::Heat | EnergyKind::Labor => {
                continue
            }
            EnergyKind::SolidFuel | EnergyKind::FluidFuel | EnergyKind::FluidHeat => {}
        }
        if energy.fuels.len() != 1 {
            return None;
        }
        let fuel = energy.fuels[0];
        let fuel_value = db.goods(fuel).fuel_value();
        if fuel_value <= 0.0 || entity.power <= 0.0 {
            return None;
        }
        let amount = entity.power * recipe.time / (fuel_value * energy.effectivity);
        match &mut result {
            Some((existing, existing_amount)) => {
                if *existing != fuel {
                    return None;
                }
                *existing_amount = existing_amount.min(amount);
            }
            None => result = Some((fuel, amount)),
        }
    }
    result
}

fn per_unit_cost(db: &Database, goods: GoodsId) -> f64 {
    match db.goods(goods).kind {
        GoodsKind::Item(_) => COST_PER_ITEM,
        GoodsKind::Fluid(_) => COST_PER_FLUID,
        GoodsKind::Special(_) => 0.0,
    }
}

/// The hypothetical cost of moving a recipe's materials through a factory:
/// machine footprint over time, belt/pipe throughput, energy, mining
/// rarity, and pollution.
fn logistics_cost(
    db: &Database,
    recipe: &Recipe,
    settings: &ProjectSettings,
    accessible: &dyn Fn(ObjectId) -> bool,
) -> f64 {
    let size = MIN_CRAFTER_SIZE.max((recipe.ingredients.len() + recipe.products.len()) / 2);
    let size_usage = COST_PER_SECOND * recipe.time * size as f64;
    let mut cost = size_usage
        * (1.0
            + COST_PER_INGREDIENT_PER_SIZE * recipe.ingredients.len() as f64
            + COST_PER_PRODUCT_PER_SIZE * recipe.products.len() as f64);

    let mut min_power = f64::INFINITY;
    let mut min_emissions = f64::INFINITY;
    for &crafter_id in &recipe.crafters {
        let entity = db.entity(crafter_id);
        if !accessible(entity.object) {
            continue;
        }
        min_power = min_power.min(entity.power);
        min_emissions = min_emissions.min(entity.energy.as_ref().map_or(0.0, |e| e.emissions));
    }
    if min_power.is_finite() {
        cost += COST_PER_MJ * min_power;
    }

    for ingredient in &recipe.ingredients {
        cost += per_unit_cost(db, ingredient.goods) * ingredient.amount;
    }
    for product in &recipe.products {
        cost += per_unit_cost(db, product.goods) * product.amount;
    }

    if let Some(source) = recipe.source_entity {
        let source = db.entity(source);
        let total_output: f64 = recipe.products.iter().map(|p| p.amount).sum();
        if source.map_generated && source.map_gen_density > 0.0 && total_output > 0.0 {
            cost *= mining_penalty(source.map_gen_density / total_output);
        }
    }

    if min_emissions.is_finite() && settings.pollution_cost_modifier > 0.0 {
        cost +=
            min_emissions * COST_PER_POLLUTION * recipe.time * settings.pollution_cost_modifier;
    }
    cost
}

/// Rarity penalty for mining recipes: sparse patches make everything
/// derived from them more expensive, capped for the truly exotic.
fn mining_penalty(density: f64) -> f64 {
    1.0 + MINING_MAX_EXTRA_PENALTY_FOR_RARITY
        .min((MINING_MAX_DENSITY_FOR_PENALTY / density).ln().max(0.0))
}

impl CostAnalysis {
    /// Build and solve the cost model. `only_current_milestones` restricts
    /// the analysis to the next milestone horizon and suppresses the
    /// analysis warning, so the unrestricted instance reports it once.
    pub fn new(
        db: &Database,
        access: &dyn Accessibility,
        settings: &ProjectSettings,
        only_current_milestones: bool,
    ) -> Self {
        let accessible = |obj: ObjectId| {
            if only_current_milestones {
                access.is_accessible_at_next_milestone(obj)
            } else {
                access.is_accessible(obj)
            }
        };

        // Science-pack demand weights the objective so pack throughput
        // dominates the cost scale.
        let mut science_usage: HashMap<GoodsId, f64> = HashMap::new();
        match settings.science_target {
            Some(target) => {
                let technology = db.technology(target);
                for ingredient in &technology.ingredients {
                    *science_usage.entry(ingredient.goods).or_default() +=
                        ingredient.amount * technology.count;
                }
            }
            None => {
                for technology in db.all_technologies() {
                    if !accessible(technology.object) {
                        continue;
                    }
                    for ingredient in &technology.ingredients {
                        *science_usage.entry(ingredient.goods).or_default() +=
                            ingredient.amount * technology.count;
                    }
                }
            }
        }

        let mut problem = Problem::new("cost-analysis");
        problem.set_maximize(true);

        let mut variables: Vec<Option<Variable>> = vec![None; db.all_goods().count()];
        for goods in db.all_goods() {
            if !accessible(goods.object) {
                continue;
            }
            // Only obtainable goods are priced: without a producing recipe
            // or a map source the maximization would be unbounded.
            let map_generated = db.map_generated_amount(goods.id).unwrap_or(0.0);
            if goods.production.is_empty() && map_generated <= 0.0 {
                continue;
            }
            let upper = if map_generated > 0.0 {
                COST_LIMIT_WHEN_GENERATES_ON_MAP / map_generated
            } else {
                f64::INFINITY
            };
            let var = problem.make_var(COST_LOWER_LIMIT, upper);
            let usage = science_usage.get(&goods.id).copied().unwrap_or(0.0);
            problem.set_objective_coefficient(var, 1e-3 + usage / 1000.0);
            variables[goods.id.0 as usize] = Some(var);
        }

        // One constraint per eligible recipe: the value a recipe creates is
        // bounded by what it consumes plus its logistics cost. The dual is
        // the recipe's hypothetical flow.
        let mut recipe_rows: Vec<(RecipeId, Constraint, f64, Option<(GoodsId, f64)>)> = Vec::new();
        for recipe in db.all_recipes() {
            if !accessible(recipe.object) {
                continue;
            }
            let all_resolved = recipe
                .ingredients
                .iter()
                .map(|i| i.goods)
                .chain(recipe.products.iter().map(|p| p.goods))
                .all(|goods| variables[goods.0 as usize].is_some());
            if !all_resolved {
                continue;
            }
            let fuel = single_fuel(db, recipe, &accessible)
                .filter(|(fuel, _)| variables[fuel.0 as usize].is_some());
            let logistics = logistics_cost(db, recipe, settings, &accessible);
            let ctr = problem.make_constraint(f64::NEG_INFINITY, logistics);
            for product in &recipe.products {
                problem.add_coefficient(ctr, variables[product.goods.0 as usize].unwrap(), product.amount);
            }
            for ingredient in &recipe.ingredients {
                problem.add_coefficient(
                    ctr,
                    variables[ingredient.goods.0 as usize].unwrap(),
                    -ingredient.amount,
                );
            }
            if let Some((fuel_goods, amount)) = fuel {
                problem.add_coefficient(ctr, variables[fuel_goods.0 as usize].unwrap(), -amount);
            }
            recipe_rows.push((recipe.id, ctr, logistics, fuel));
        }

        // Tie-breaks: a derived item can never cost more than its source,
        // and a hotter fluid variant can never cost more than a colder one.
        for goods in db.all_goods() {
            let Some(var) = variables[goods.id.0 as usize] else {
                continue;
            };
            if let Some(source) = goods.item().and_then(|i| i.misc_source) {
                if let Some(source_var) = variables[source.0 as usize] {
                    let ctr = problem.make_constraint(f64::NEG_INFINITY, 0.0);
                    problem.add_coefficient(ctr, var, 1.0);
                    problem.add_coefficient(ctr, source_var, -1.0);
                }
            }
            if let Some(fluid) = goods.fluid() {
                let list = &fluid.variants;
                if list.len() > 1 && list[0] == goods.id {
                    for pair in list.windows(2) {
                        let (Some(cold), Some(hot)) = (
                            variables[pair[0].0 as usize],
                            variables[pair[1].0 as usize],
                        ) else {
                            continue;
                        };
                        let ctr = problem.make_constraint(f64::NEG_INFINITY, 0.0);
                        problem.add_coefficient(ctr, hot, 1.0);
                        problem.add_coefficient(ctr, cold, -1.0);
                    }
                }
            }
        }

        let solution = problem.solve();
        let solved = solution.status().is_feasible();
        let has_warning = !solved && !only_current_milestones;
        if solved {
            info!(
                "cost analysis solved: {} goods, {} recipes",
                problem.var_count(),
                recipe_rows.len()
            );
        } else {
            warn!("cost analysis failed with {:?}", solution.status());
        }

        let mut cost = db.object_mapping(f64::INFINITY);
        let mut goods_cost = db.goods_mapping(f64::INFINITY);
        for goods in db.all_goods() {
            if let Some(var) = variables[goods.id.0 as usize] {
                let value = if solved { solution.value(var) } else { 0.0 };
                cost[goods.object] = value;
                goods_cost[goods.id] = value;
            }
        }

        let mut flow = db.object_mapping(0.0);
        if solved {
            for &(recipe_id, ctr, _, _) in &recipe_rows {
                let recipe_flow = solution.dual(ctr).max(0.0);
                let recipe = db.recipe(recipe_id);
                flow[recipe.object] = recipe_flow;
                for product in &recipe.products {
                    flow[db.goods(product.goods).object] += recipe_flow * product.amount;
                }
            }
        }

        // Entities are priced at their cheapest placement item.
        for entity in db.all_entities() {
            let placement = entity
                .items_to_place
                .iter()
                .map(|&item| goods_cost[item])
                .fold(f64::INFINITY, f64::min);
            cost[entity.object] = placement;
        }

        let mut recipe_cost = db.recipe_mapping(f64::INFINITY);
        let mut recipe_product_cost = db.recipe_mapping(0.0);
        let mut recipe_waste_percentage = db.recipe_mapping(0.0);
        for &(recipe_id, _, logistics, fuel) in &recipe_rows {
            let recipe = db.recipe(recipe_id);
            let mut full_cost = logistics;
            for ingredient in &recipe.ingredients {
                full_cost += goods_cost[ingredient.goods] * ingredient.amount;
            }
            if let Some((fuel_goods, amount)) = fuel {
                full_cost += goods_cost[fuel_goods] * amount;
            }
            let product_cost: f64 = recipe
                .products
                .iter()
                .map(|p| goods_cost[p.goods] * p.amount)
                .sum();
            recipe_cost[recipe_id] = full_cost;
            recipe_product_cost[recipe_id] = product_cost;
            recipe_waste_percentage[recipe_id] = if full_cost.abs() > WASTE_EPSILON {
                (1.0 - product_cost / full_cost).clamp(0.0, 1.0)
            } else {
                0.0
            };
            cost[recipe.object] = full_cost;
        }

        // Goods worth keeping on screen: widely used, expensive, and with
        // at least one waste-free consumer.
        let important_items = db
            .all_goods()
            .filter(|goods| goods.usages.len() >= 2 && goods_cost[goods.id].is_finite())
            .map(|goods| {
                let clean_usages = goods
                    .usages
                    .iter()
                    .filter(|&&usage| {
                        accessible(db.recipe(usage).object)
                            && recipe_waste_percentage[usage] == 0.0
                    })
                    .count();
                let score = flow[goods.object] * goods_cost[goods.id] * clean_usages as f64;
                (goods.id, score)
            })
            .sorted_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)))
            .map(|(id, _)| id)
            .collect();

        Self {
            cost,
            goods_cost,
            flow,
            recipe_cost,
            recipe_product_cost,
            recipe_waste_percentage,
            important_items,
            has_warning,
        }
    }

    /// Hypothetical cost of a goods; infinite when inaccessible.
    pub fn cost(&self, goods: GoodsId) -> f64 {
        self.goods_cost[goods]
    }

    /// Cost of any catalog object (goods, recipe, or entity).
    pub fn object_cost(&self, obj: ObjectId) -> f64 {
        self.cost[obj]
    }

    /// Hypothetical whole-factory flow of an object.
    pub fn flow(&self, obj: ObjectId) -> f64 {
        self.flow[obj]
    }

    pub fn recipe_cost(&self, recipe: RecipeId) -> f64 {
        self.recipe_cost[recipe]
    }

    pub fn recipe_product_cost(&self, recipe: RecipeId) -> f64 {
        self.recipe_product_cost[recipe]
    }

    /// Fraction of a recipe's input value lost by running it, in `[0, 1]`.
    pub fn recipe_waste_percentage(&self, recipe: RecipeId) -> f64 {
        self.recipe_waste_percentage[recipe]
    }

    /// Goods with at least two consumers, ordered by display importance.
    pub fn important_items(&self) -> &[GoodsId] {
        &self.important_items
    }

    /// Whether the LP failed to solve. Surfaced once per analysis and
    /// suppressed for the milestone-restricted instance.
    pub fn has_warning(&self) -> bool {
        self.has_warning
    }

    pub fn display_cost(&self, db: &Database, obj: ObjectId) -> String {
        let cost = self.object_cost(obj);
        if !cost.is_finite() {
            return format!("{}: not accessible", db.object_locale(obj));
        }
        format!("¥{cost:.1}")
    }
}
