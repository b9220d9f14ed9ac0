//! Fixture mod packs shared by the analysis tests. Each pack is a small,
//! closed economy: every goods is either map-generated or produced by some
//! recipe, so the cost model stays bounded.

use crate::database::{
    Crafter, Database, DatabaseBuilder, EnergyKind, EntityEnergy, EntityId, GoodsId, Ingredient,
    ModuleSpec, Product,
};

/// Route `log` output through the test harness; honors `RUST_LOG`.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn placeable(b: &mut DatabaseBuilder, entity: EntityId, item_name: &str) {
    let item = b.add_item(item_name);
    b.item_mut(item).place_result = Some(entity);
}

fn electric_drill(b: &mut DatabaseBuilder) -> EntityId {
    let drill = b.add_entity("electric-mining-drill");
    b.entity_mut(drill).crafter = Some(Crafter::default());
    b.entity_mut(drill).power = 0.09;
    b.entity_mut(drill).energy = Some(EntityEnergy::default());
    placeable(b, drill, "electric-mining-drill-item");
    drill
}

fn mining_recipe(
    b: &mut DatabaseBuilder,
    name: &str,
    output: GoodsId,
    drill: EntityId,
    density: f64,
) {
    let patch = b.add_entity(&format!("{name}-patch"));
    b.entity_mut(patch).map_generated = true;
    b.entity_mut(patch).map_gen_density = density;
    let recipe = b.add_recipe(name, 1.0);
    b.recipe_mut(recipe).products.push(Product::new(output, 1.0));
    b.recipe_mut(recipe).crafters.push(drill);
    b.recipe_mut(recipe).source_entity = Some(patch);
}

/// Iron smelting with a coal-burning furnace, a couple of downstream
/// consumers, a misc-source item, and a productivity module.
pub fn fueled_pack() -> Database {
    let mut b = DatabaseBuilder::new();
    let ore = b.add_item("iron-ore");
    let plate = b.add_item("iron-plate");
    let gear = b.add_item("iron-gear");
    let stick = b.add_item("iron-stick");
    let coal = b.add_item("coal");
    b.item_mut(coal).fuel_value = 4.0;
    let briquette = b.add_item("coal-briquette");
    b.item_mut(briquette).misc_source = Some(coal);
    b.item_mut(coal).fuel_result = Some(briquette);
    let module = b.add_item("productivity-module");
    b.item_mut(module).module = Some(ModuleSpec {
        productivity: 0.1,
        consumption: 0.4,
        ..ModuleSpec::default()
    });

    let drill = electric_drill(&mut b);
    mining_recipe(&mut b, "mine-iron-ore", ore, drill, 1000.0);
    mining_recipe(&mut b, "mine-coal", coal, drill, 1000.0);

    let furnace = b.add_entity("stone-furnace");
    b.entity_mut(furnace).crafter = Some(Crafter::default());
    b.entity_mut(furnace).power = 0.15;
    b.entity_mut(furnace).energy = Some(EntityEnergy {
        kind: EnergyKind::SolidFuel,
        fuels: vec![coal],
        ..EntityEnergy::default()
    });
    placeable(&mut b, furnace, "stone-furnace-item");

    let assembler = b.add_entity("assembling-machine");
    b.entity_mut(assembler).crafter = Some(Crafter::default());
    b.entity_mut(assembler).power = 0.15;
    b.entity_mut(assembler).energy = Some(EntityEnergy::default());
    placeable(&mut b, assembler, "assembling-machine-item");

    let smelt = b.add_recipe("iron-plate", 3.5);
    b.recipe_mut(smelt).ingredients.push(Ingredient::new(ore, 1.0));
    b.recipe_mut(smelt).products.push(Product::new(plate, 1.0));
    b.recipe_mut(smelt).crafters.push(furnace);

    let gears = b.add_recipe("iron-gear", 0.5);
    b.recipe_mut(gears).ingredients.push(Ingredient::new(plate, 2.0));
    b.recipe_mut(gears).products.push(Product::new(gear, 1.0));
    b.recipe_mut(gears).crafters.push(assembler);

    let sticks = b.add_recipe("iron-stick", 0.5);
    b.recipe_mut(sticks).ingredients.push(Ingredient::new(plate, 1.0));
    b.recipe_mut(sticks).products.push(Product::new(stick, 2.0));
    b.recipe_mut(sticks).crafters.push(assembler);

    let press = b.add_recipe("coal-briquette", 1.0);
    b.recipe_mut(press).ingredients.push(Ingredient::new(coal, 1.0));
    b.recipe_mut(press).products.push(Product::new(briquette, 1.0));
    b.recipe_mut(press).crafters.push(assembler);

    let automation = b.add_technology("automation", 50.0);
    b.technology_mut(automation)
        .ingredients
        .push(Ingredient::new(gear, 1.0));
    b.technology_mut(automation).unlock_recipes.push(gears);

    b.build().unwrap()
}

/// Water pumping plus two boiler recipes producing steam temperature
/// variants.
pub fn steam_pack() -> Database {
    let mut b = DatabaseBuilder::new();
    let water = b.add_fluid("water", 15.0);
    let steam_cold = b.add_fluid_variant("steam", 165.0);
    let steam_hot = b.add_fluid_variant("steam", 500.0);

    let pump = b.add_entity("offshore-pump");
    b.entity_mut(pump).crafter = Some(Crafter::default());
    b.entity_mut(pump).power = 0.03;
    b.entity_mut(pump).energy = Some(EntityEnergy::default());
    placeable(&mut b, pump, "offshore-pump-item");
    let well = b.add_entity("water-well");
    b.entity_mut(well).map_generated = true;
    b.entity_mut(well).map_gen_density = 1000.0;
    let pumping = b.add_recipe("pump-water", 1.0);
    b.recipe_mut(pumping).products.push(Product::new(water, 60.0));
    b.recipe_mut(pumping).crafters.push(pump);
    b.recipe_mut(pumping).source_entity = Some(well);

    let boiler = b.add_entity("boiler");
    b.entity_mut(boiler).crafter = Some(Crafter::default());
    b.entity_mut(boiler).power = 1.8;
    b.entity_mut(boiler).energy = Some(EntityEnergy::default());
    placeable(&mut b, boiler, "boiler-item");

    let boil = b.add_recipe("boil-water", 1.0);
    b.recipe_mut(boil).ingredients.push(Ingredient::new(water, 60.0));
    b.recipe_mut(boil).products.push(Product::new(steam_cold, 60.0));
    b.recipe_mut(boil).crafters.push(boiler);

    let superheat = b.add_recipe("superheat-water", 1.0);
    b.recipe_mut(superheat)
        .ingredients
        .push(Ingredient::new(water, 60.0));
    b.recipe_mut(superheat)
        .products
        .push(Product::new(steam_hot, 60.0));
    b.recipe_mut(superheat).crafters.push(boiler);

    let work = b.add_special("mechanical-work", true, false);
    let turbine = b.add_entity("steam-turbine");
    b.entity_mut(turbine).crafter = Some(Crafter::default());
    b.entity_mut(turbine).energy = Some(EntityEnergy::default());
    placeable(&mut b, turbine, "steam-turbine-item");
    let run = b.add_recipe("run-turbine", 1.0);
    let mut steam_input = Ingredient::new(steam_cold, 30.0);
    steam_input.variants = Some(vec![steam_cold, steam_hot]);
    b.recipe_mut(run).ingredients.push(steam_input);
    b.recipe_mut(run).products.push(Product::new(work, 1.0));
    b.recipe_mut(run).crafters.push(turbine);

    b.build().unwrap()
}

/// Two identical ores whose patches differ only in map density.
pub fn mining_pack() -> Database {
    let mut b = DatabaseBuilder::new();
    let rare = b.add_item("rare-ore");
    let dense = b.add_item("dense-ore");
    let drill = electric_drill(&mut b);
    mining_recipe(&mut b, "mine-rare-ore", rare, drill, 200.0);
    mining_recipe(&mut b, "mine-dense-ore", dense, drill, 2000.0);
    b.build().unwrap()
}

/// Two recipes feeding each other: alpha needs beta, beta needs alpha.
pub fn loop_pack() -> Database {
    let mut b = DatabaseBuilder::new();
    let alpha = b.add_item("alpha");
    let beta = b.add_item("beta");
    let machine = b.add_entity("machine");
    b.entity_mut(machine).crafter = Some(Crafter::default());
    b.entity_mut(machine).power = 0.1;
    b.entity_mut(machine).energy = Some(EntityEnergy::default());
    placeable(&mut b, machine, "machine-item");

    let make_alpha = b.add_recipe("alpha", 1.0);
    b.recipe_mut(make_alpha).ingredients.push(Ingredient::new(beta, 1.0));
    b.recipe_mut(make_alpha).products.push(Product::new(alpha, 1.0));
    b.recipe_mut(make_alpha).crafters.push(machine);

    let make_beta = b.add_recipe("beta", 1.0);
    b.recipe_mut(make_beta).ingredients.push(Ingredient::new(alpha, 1.0));
    b.recipe_mut(make_beta).products.push(Product::new(beta, 1.0));
    b.recipe_mut(make_beta).crafters.push(machine);

    b.build().unwrap()
}

/// A cracking-style recipe with a by-product nobody consumes.
pub fn branching_pack() -> Database {
    let mut b = DatabaseBuilder::new();
    let feedstock = b.add_item("feedstock");
    let fuel_gas = b.add_item("fuel-gas");
    let residue = b.add_item("residue");
    let drill = electric_drill(&mut b);
    mining_recipe(&mut b, "mine-feedstock", feedstock, drill, 1000.0);

    let cracker = b.add_entity("cracker");
    b.entity_mut(cracker).crafter = Some(Crafter::default());
    b.entity_mut(cracker).power = 0.2;
    b.entity_mut(cracker).energy = Some(EntityEnergy::default());
    placeable(&mut b, cracker, "cracker-item");

    let crack = b.add_recipe("crack-feedstock", 1.0);
    b.recipe_mut(crack)
        .ingredients
        .push(Ingredient::new(feedstock, 1.0));
    b.recipe_mut(crack).products.push(Product::new(fuel_gas, 2.0));
    b.recipe_mut(crack).products.push(Product::new(residue, 1.0));
    b.recipe_mut(crack).crafters.push(cracker);

    b.build().unwrap()
}
