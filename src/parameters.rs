// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use serde::{Deserialize, Serialize};

use crate::database::{Crafter, Database, EnergyKind, EntityId, GoodsId, Recipe, RecipeId};
use crate::project::ProjectSettings;

/// A module choice with a count of installed copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleInstall {
    pub module: GoodsId,
    pub count: u32,
}

/// Beacons broadcasting module effects onto a row's crafters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    pub beacon: EntityId,
    pub count: u32,
    pub modules: Vec<ModuleInstall>,
}

/// Module and beacon arrangement of a recipe row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub modules: Vec<ModuleInstall>,
    pub beacon: Option<BeaconConfig>,
}

/// Derived per-row quantities computed before each solve. Pure output of
/// [`calculate`]; cleared for disabled rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecipeParameters {
    /// Seconds per craft after speed bonuses.
    pub recipe_time: f64,
    pub speed_bonus: f64,
    pub productivity: f64,
    /// Fuel units consumed per second by one building. NaN when no fuel is
    /// resolvable; consumers skip fuel terms on NaN.
    pub fuel_usage_per_second_per_building: f64,
    /// Fuel units consumed per craft.
    pub fuel_usage_per_second_per_recipe: f64,
    /// Pollution emitted per craft.
    pub pollution_per_recipe: f64,
}

impl Default for RecipeParameters {
    fn default() -> Self {
        Self {
            recipe_time: 0.0,
            speed_bonus: 0.0,
            productivity: 0.0,
            fuel_usage_per_second_per_building: f64::NAN,
            fuel_usage_per_second_per_recipe: f64::NAN,
            pollution_per_recipe: 0.0,
        }
    }
}

/// Whether a `(module, crafter)` pairing is allowed for a recipe. Every
/// non-zero effect of the module must be permitted by the crafter, and the
/// recipe's own allowlist (when present) and the module's limitation sets
/// must both admit it.
pub fn module_accepted(db: &Database, recipe: &Recipe, crafter: &Crafter, module: GoodsId) -> bool {
    let Some(spec) = db.goods(module).item().and_then(|i| i.module.as_ref()) else {
        return false;
    };
    if !crafter.allowed_effects.is_superset(spec.effects()) {
        return false;
    }
    if !recipe.modules.is_empty() && !recipe.modules.contains(&module) {
        return false;
    }
    if !spec.limitation.is_empty() && !spec.limitation.contains(&recipe.id) {
        return false;
    }
    if spec.limitation_blacklist.contains(&recipe.id) {
        return false;
    }
    true
}

/// Compute the derived quantities for one `(recipe, crafter, fuel, modules,
/// beacons)` tuple. No side effects; called once per row before each solve.
pub fn calculate(
    db: &Database,
    recipe_id: RecipeId,
    crafter: Option<EntityId>,
    fuel: Option<GoodsId>,
    config: &ModuleConfig,
    settings: &ProjectSettings,
) -> RecipeParameters {
    let recipe = db.recipe(recipe_id);
    let entity = crafter.map(|id| db.entity(id));
    let crafter_caps = entity.and_then(|e| e.crafter.as_ref());

    let crafting_speed = crafter_caps.map_or(1.0, |c| c.speed);
    let mut speed_bonus = 0.0;
    let mut productivity = crafter_caps.map_or(0.0, |c| c.base_productivity);

    if let Some(caps) = crafter_caps {
        for install in &config.modules {
            let Some(spec) = db.goods(install.module).item().and_then(|i| i.module.as_ref())
            else {
                continue;
            };
            if !module_accepted(db, recipe, caps, install.module) {
                continue;
            }
            speed_bonus += spec.speed * install.count as f64;
            productivity += spec.productivity * install.count as f64;
        }
        if let Some(beacon_config) = &config.beacon {
            if let Some(beacon) = db.entity(beacon_config.beacon).beacon.as_ref() {
                let beacon_speed: f64 = beacon_config
                    .modules
                    .iter()
                    .filter_map(|install| {
                        let spec = db.goods(install.module).item()?.module.as_ref()?;
                        Some(spec.speed * install.count as f64)
                    })
                    .sum();
                speed_bonus += beacon_config.count as f64 * beacon.efficiency * beacon_speed;
            }
        }
    }

    let energy = entity.and_then(|e| e.energy.as_ref());
    if matches!(energy.map(|e| e.kind), Some(EnergyKind::Labor)) {
        speed_bonus += settings.research_speed_bonus;
    }

    let recipe_time = recipe.time / (crafting_speed * (1.0 + speed_bonus));

    let mut fuel_per_building = f64::NAN;
    if let (Some(entity), Some(energy), Some(fuel)) = (entity, energy, fuel) {
        let burns = matches!(
            energy.kind,
            EnergyKind::SolidFuel | EnergyKind::FluidFuel | EnergyKind::FluidHeat
        );
        let fuel_value = db.goods(fuel).fuel_value();
        if burns && fuel_value > 0.0 && entity.power > 0.0 {
            let mut usage = entity.power / (energy.effectivity * fuel_value);
            if energy.fuel_consumption_limit > 0.0 {
                usage = usage.min(energy.fuel_consumption_limit / fuel_value);
            }
            fuel_per_building = usage;
        }
    }
    let fuel_per_recipe = fuel_per_building * recipe_time;

    let pollution_per_recipe = energy.map_or(0.0, |e| e.emissions) * recipe_time;

    RecipeParameters {
        recipe_time,
        speed_bonus,
        productivity,
        fuel_usage_per_second_per_building: fuel_per_building,
        fuel_usage_per_second_per_recipe: fuel_per_recipe,
        pollution_per_recipe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Crafter, DatabaseBuilder, EntityEnergy, Ingredient, ModuleSpec, Product};
    use proptest::prelude::*;

    fn smelting_db() -> (crate::database::Database, RecipeId, EntityId) {
        let mut b = DatabaseBuilder::new();
        let ore = b.add_item("iron-ore");
        let plate = b.add_item("iron-plate");
        let furnace = b.add_entity("stone-furnace");
        let furnace_item = b.add_item("stone-furnace-item");
        b.item_mut(furnace_item).place_result = Some(furnace);
        b.entity_mut(furnace).crafter = Some(Crafter::default());
        let smelt = b.add_recipe("iron-plate", 3.5);
        b.recipe_mut(smelt).ingredients.push(Ingredient::new(ore, 1.0));
        b.recipe_mut(smelt).products.push(Product::new(plate, 1.0));
        b.recipe_mut(smelt).crafters.push(furnace);
        let db = b.build().unwrap();
        (db, smelt, furnace)
    }

    #[test]
    fn base_recipe_time() {
        let (db, smelt, furnace) = smelting_db();
        let params = calculate(
            &db,
            smelt,
            Some(furnace),
            None,
            &ModuleConfig::default(),
            &ProjectSettings::default(),
        );
        assert_eq!(params.recipe_time, 3.5);
        assert!(params.fuel_usage_per_second_per_building.is_nan());
    }

    #[test]
    fn solid_fuel_consumption_per_recipe() {
        let mut b = DatabaseBuilder::new();
        let ore = b.add_item("iron-ore");
        let plate = b.add_item("iron-plate");
        let coal = b.add_item("coal");
        b.item_mut(coal).fuel_value = 4.0;
        let furnace = b.add_entity("stone-furnace");
        let furnace_item = b.add_item("stone-furnace-item");
        b.item_mut(furnace_item).place_result = Some(furnace);
        b.entity_mut(furnace).crafter = Some(Crafter::default());
        b.entity_mut(furnace).power = 0.15;
        b.entity_mut(furnace).energy = Some(EntityEnergy {
            kind: EnergyKind::SolidFuel,
            fuels: vec![coal],
            ..EntityEnergy::default()
        });
        let smelt = b.add_recipe("iron-plate", 3.5);
        b.recipe_mut(smelt).ingredients.push(Ingredient::new(ore, 1.0));
        b.recipe_mut(smelt).products.push(Product::new(plate, 1.0));
        b.recipe_mut(smelt).crafters.push(furnace);
        let db = b.build().unwrap();

        let params = calculate(
            &db,
            smelt,
            Some(furnace),
            Some(coal),
            &ModuleConfig::default(),
            &ProjectSettings::default(),
        );
        assert!((params.fuel_usage_per_second_per_building - 0.0375).abs() < 1e-12);
        assert!((params.fuel_usage_per_second_per_recipe - 0.13125).abs() < 1e-12);
    }

    #[test]
    fn module_acceptance_is_intersection() {
        let mut b = DatabaseBuilder::new();
        let ore = b.add_item("ore");
        let plate = b.add_item("plate");
        let prod_module = b.add_item("productivity-module");
        b.item_mut(prod_module).module = Some(ModuleSpec {
            productivity: 0.1,
            consumption: 0.4,
            ..ModuleSpec::default()
        });
        let speed_module = b.add_item("speed-module");
        b.item_mut(speed_module).module = Some(ModuleSpec {
            speed: 0.5,
            ..ModuleSpec::default()
        });
        let machine = b.add_entity("machine");
        let machine_item = b.add_item("machine-item");
        b.item_mut(machine_item).place_result = Some(machine);
        b.entity_mut(machine).crafter = Some(Crafter {
            allowed_effects: ModuleEffect::Speed | ModuleEffect::Consumption,
            ..Crafter::default()
        });
        let recipe = b.add_recipe("smelt", 1.0);
        b.recipe_mut(recipe).ingredients.push(Ingredient::new(ore, 1.0));
        b.recipe_mut(recipe).products.push(Product::new(plate, 1.0));
        b.recipe_mut(recipe).crafters.push(machine);
        b.recipe_mut(recipe).modules.push(speed_module);
        let db = b.build().unwrap();

        let recipe_ref = db.recipe(recipe);
        let caps = db.entity(machine).crafter.as_ref().unwrap();
        // Productivity effect not permitted by the crafter.
        assert!(!module_accepted(&db, recipe_ref, caps, prod_module));
        // Speed module passes both the crafter and the recipe allowlist.
        assert!(module_accepted(&db, recipe_ref, caps, speed_module));
    }

    use crate::database::ModuleEffect;

    fn lab_db() -> (crate::database::Database, RecipeId, EntityId) {
        let mut b = DatabaseBuilder::new();
        let pack = b.add_item("science-pack");
        let progress = b.add_special("research", false, true);
        let lab = b.add_entity("lab");
        let lab_item = b.add_item("lab-item");
        b.item_mut(lab_item).place_result = Some(lab);
        b.entity_mut(lab).crafter = Some(Crafter::default());
        b.entity_mut(lab).energy = Some(EntityEnergy {
            kind: EnergyKind::Labor,
            ..EntityEnergy::default()
        });
        let research = b.add_recipe("research", 60.0);
        b.recipe_mut(research).ingredients.push(Ingredient::new(pack, 1.0));
        b.recipe_mut(research).products.push(Product::new(progress, 1.0));
        b.recipe_mut(research).crafters.push(lab);
        (b.build().unwrap(), research, lab)
    }

    proptest! {
        #[test]
        fn research_bonus_never_increases_recipe_time(bonus in 0.0f64..10.0) {
            let (db, research, lab) = lab_db();
            let settings = ProjectSettings {
                research_speed_bonus: bonus,
                ..ProjectSettings::default()
            };
            let slow = calculate(&db, research, Some(lab), None, &ModuleConfig::default(), &ProjectSettings::default());
            let fast = calculate(&db, research, Some(lab), None, &ModuleConfig::default(), &settings);
            prop_assert!(fast.recipe_time <= slow.recipe_time);
        }
    }
}
