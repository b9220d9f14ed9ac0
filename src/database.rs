// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use enumset::{EnumSet, EnumSetType};
use internment::Intern;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key into one of the dense per-kind object collections of a [`Database`].
pub trait DatabaseKey: Copy {
    fn index(self) -> usize;
}

macro_rules! typed_id {
    ($($(#[$m:meta])*
     $Self:ident,)+) => {
        $(
            $(#[$m])*
            #[derive(
                Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $Self(pub u32);

            impl DatabaseKey for $Self {
                fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl fmt::Display for $Self {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, concat!(stringify!($Self), "#{}"), self.0)
                }
            }
        )+
    };
}

typed_id! {
    /// Id of a goods (item, fluid, or special virtual goods).
    GoodsId,
    /// Id of a recipe.
    RecipeId,
    /// Id of a technology.
    TechnologyId,
    /// Id of an entity.
    EntityId,
    /// Unified id spanning every object of the catalog, for whole-catalog
    /// mappings such as the cost table.
    ObjectId,
}

/// What an [`ObjectId`] points at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjectRef {
    Goods(GoodsId),
    Recipe(RecipeId),
    Technology(TechnologyId),
    Entity(EntityId),
}

/// Dense array keyed by one of the typed id kinds. All solver tables and
/// per-collection analysis outputs are such mappings.
#[derive(Debug, Clone)]
pub struct Mapping<K: DatabaseKey, V> {
    values: Vec<V>,
    _key: PhantomData<fn(K)>,
}

impl<K: DatabaseKey, V: Clone> Mapping<K, V> {
    /// Create a mapping over a collection of `len` ids, filled with `default`.
    pub fn new(len: usize, default: V) -> Self {
        Self {
            values: vec![default; len],
            _key: PhantomData,
        }
    }
}

impl<K: DatabaseKey, V> Mapping<K, V> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.values.iter()
    }
}

impl<K: DatabaseKey, V> Index<K> for Mapping<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &V {
        &self.values[key.index()]
    }
}

impl<K: DatabaseKey, V> IndexMut<K> for Mapping<K, V> {
    fn index_mut(&mut self, key: K) -> &mut V {
        &mut self.values[key.index()]
    }
}

/// An effect a module can apply to a crafter.
#[derive(EnumSetType, Debug, Hash)]
pub enum ModuleEffect {
    Speed,
    Productivity,
    Consumption,
    Pollution,
}

/// Module capability of an item.
#[derive(Debug, Clone, Default)]
pub struct ModuleSpec {
    pub speed: f64,
    pub productivity: f64,
    pub consumption: f64,
    pub pollution: f64,
    /// If non-empty, only these recipes accept the module.
    pub limitation: Vec<RecipeId>,
    /// Recipes which never accept the module, regardless of `limitation`.
    pub limitation_blacklist: Vec<RecipeId>,
}

impl ModuleSpec {
    /// The set of effects this module actually has (non-zero bonuses).
    pub fn effects(&self) -> EnumSet<ModuleEffect> {
        let mut set = EnumSet::empty();
        if self.speed != 0.0 {
            set |= ModuleEffect::Speed;
        }
        if self.productivity != 0.0 {
            set |= ModuleEffect::Productivity;
        }
        if self.consumption != 0.0 {
            set |= ModuleEffect::Consumption;
        }
        if self.pollution != 0.0 {
            set |= ModuleEffect::Pollution;
        }
        set
    }
}

/// A solid item.
#[derive(Debug, Clone)]
pub struct Item {
    pub stack_size: u32,
    /// Energy in MJ when burned as solid fuel; 0 for non-fuels.
    pub fuel_value: f64,
    /// Goods left over after burning this item as fuel.
    pub fuel_result: Option<GoodsId>,
    /// Entity constructed by placing this item.
    pub place_result: Option<EntityId>,
    /// Non-recipe source goods this item is derived from (e.g. barrel
    /// contents); a derived item can never cost more than its source.
    pub misc_source: Option<GoodsId>,
    /// Module capability, if this item is a module.
    pub module: Option<ModuleSpec>,
}

impl Default for Item {
    fn default() -> Self {
        Self {
            stack_size: 50,
            fuel_value: 0.0,
            fuel_result: None,
            place_result: None,
            misc_source: None,
            module: None,
        }
    }
}

/// A fluid at a specific temperature.
#[derive(Debug, Clone)]
pub struct Fluid {
    pub temperature: f64,
    pub temperature_range: (f64, f64),
    pub heat_capacity: f64,
    /// Energy in MJ per unit when burned or condensed.
    pub heat_value: f64,
    /// Base name shared by every temperature variant of this fluid.
    pub original_name: Intern<str>,
    /// All temperature variants sharing `original_name` (including this
    /// one), sorted ascending by temperature. Filled by the builder.
    pub variants: Vec<GoodsId>,
}

/// Virtual goods such as electricity or research progress.
#[derive(Debug, Clone, Default)]
pub struct Special {
    pub is_power: bool,
    pub is_research: bool,
}

#[derive(Debug, Clone)]
pub enum GoodsKind {
    Item(Item),
    Fluid(Fluid),
    Special(Special),
}

/// Anything consumable or producible by a recipe.
#[derive(Debug, Clone)]
pub struct Goods {
    pub id: GoodsId,
    pub object: ObjectId,
    pub name: Intern<str>,
    pub locale: String,
    pub kind: GoodsKind,
    /// Recipes consuming this goods. Filled by the builder.
    pub usages: Vec<RecipeId>,
    /// Recipes producing this goods. Filled by the builder.
    pub production: Vec<RecipeId>,
}

impl Goods {
    pub fn is_fluid(&self) -> bool {
        matches!(self.kind, GoodsKind::Fluid(_))
    }

    pub fn item(&self) -> Option<&Item> {
        match &self.kind {
            GoodsKind::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn fluid(&self) -> Option<&Fluid> {
        match &self.kind {
            GoodsKind::Fluid(fluid) => Some(fluid),
            _ => None,
        }
    }

    /// Energy in MJ released by burning one unit, 0 if not a fuel.
    pub fn fuel_value(&self) -> f64 {
        match &self.kind {
            GoodsKind::Item(item) => item.fuel_value,
            GoodsKind::Fluid(fluid) => fluid.heat_value,
            GoodsKind::Special(_) => 0.0,
        }
    }

    /// Goods left over after burning one unit of this goods as fuel.
    pub fn fuel_result(&self) -> Option<GoodsId> {
        match &self.kind {
            GoodsKind::Item(item) => item.fuel_result,
            _ => None,
        }
    }
}

/// One consumed goods of a recipe.
#[derive(Debug, Clone)]
pub struct Ingredient {
    pub goods: GoodsId,
    pub amount: f64,
    /// Acceptable temperature variants, ascending, when the ingredient is a
    /// fluid consumed over a temperature range. `goods` is the default.
    pub variants: Option<Vec<GoodsId>>,
}

impl Ingredient {
    pub fn new(goods: GoodsId, amount: f64) -> Self {
        Self {
            goods,
            amount,
            variants: None,
        }
    }

    /// The goods actually consumed given an optional fixed variant choice.
    /// Picks outside the accepted variant list fall back to the default.
    pub fn resolve_variant(&self, pick: Option<GoodsId>) -> GoodsId {
        match (&self.variants, pick) {
            (Some(variants), Some(pick)) if variants.contains(&pick) => pick,
            _ => self.goods,
        }
    }
}

/// One produced goods of a recipe.
#[derive(Debug, Clone)]
pub struct Product {
    pub goods: GoodsId,
    /// Expected amount per craft: `probability * (amount_min + amount_max) / 2`.
    pub amount: f64,
    /// Portion of `amount` subject to the productivity bonus, after the
    /// catalyst portion is deducted.
    pub productivity_amount: f64,
}

impl Product {
    pub fn new(goods: GoodsId, amount: f64) -> Self {
        Self {
            goods,
            amount,
            productivity_amount: amount,
        }
    }

    /// Build a product from probabilistic min/max bounds.
    pub fn probabilistic(goods: GoodsId, probability: f64, amount_min: f64, amount_max: f64) -> Self {
        Self::new(goods, probability * (amount_min + amount_max) / 2.0)
    }

    /// Deduct the catalyst portion, which re-enters the recipe as an
    /// ingredient and therefore receives no productivity bonus.
    pub fn with_catalyst(mut self, catalyst: f64) -> Self {
        self.productivity_amount = (self.amount - catalyst).max(0.0);
        self
    }

    pub fn amount_with_productivity(&self, bonus: f64) -> f64 {
        self.amount + self.productivity_amount * bonus
    }
}

#[derive(EnumSetType, Debug)]
pub enum RecipeFlag {
    /// Pseudo-recipe injected by the loader whose effective time comes from
    /// its flags rather than a crafting cycle (rocket launches, pumping
    /// markers). Exempt from the positive-time validation.
    Marker,
    /// Production scales with available power rather than crafting speed.
    ScalesWithPower,
}

/// A transformation of ingredients into products executed by a crafter.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: RecipeId,
    pub object: ObjectId,
    pub name: Intern<str>,
    pub locale: String,
    /// Crafting time in seconds at speed 1.
    pub time: f64,
    pub enabled: bool,
    pub flags: EnumSet<RecipeFlag>,
    pub ingredients: Vec<Ingredient>,
    pub products: Vec<Product>,
    /// Entities able to execute this recipe.
    pub crafters: Vec<EntityId>,
    /// Modules this recipe admits. Empty means every module is allowed.
    pub modules: Vec<GoodsId>,
    /// Map-generated entity this recipe extracts from, if it is a mining
    /// style recipe.
    pub source_entity: Option<EntityId>,
    pub main_product: Option<GoodsId>,
    /// Technologies unlocking this recipe.
    pub technologies: Vec<TechnologyId>,
}

/// A research target. Recipe-shaped: its ingredients are science packs.
#[derive(Debug, Clone)]
pub struct Technology {
    pub id: TechnologyId,
    pub object: ObjectId,
    pub name: Intern<str>,
    pub locale: String,
    pub time: f64,
    /// Number of research cycles required.
    pub count: f64,
    pub ingredients: Vec<Ingredient>,
    pub prerequisites: Vec<TechnologyId>,
    pub unlock_recipes: Vec<RecipeId>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnergyKind {
    Void,
    Electric,
    Heat,
    SolidFuel,
    FluidFuel,
    FluidHeat,
    Labor,
}

/// Energy source of an entity.
#[derive(Debug, Clone)]
pub struct EntityEnergy {
    pub kind: EnergyKind,
    /// Pollution per second while working.
    pub emissions: f64,
    /// Passive power draw in MW while idle.
    pub drain: f64,
    /// Fraction of fuel energy converted to work.
    pub effectivity: f64,
    /// Maximum fuel consumed per second per building, in MW; 0 means
    /// unlimited.
    pub fuel_consumption_limit: f64,
    pub working_temperature: (f64, f64),
    pub acceptable_temperature: (f64, f64),
    /// Goods accepted as fuel.
    pub fuels: Vec<GoodsId>,
}

impl Default for EntityEnergy {
    fn default() -> Self {
        Self {
            kind: EnergyKind::Electric,
            emissions: 0.0,
            drain: 0.0,
            effectivity: 1.0,
            fuel_consumption_limit: 0.0,
            working_temperature: (f64::NEG_INFINITY, f64::INFINITY),
            acceptable_temperature: (f64::NEG_INFINITY, f64::INFINITY),
            fuels: Vec::new(),
        }
    }
}

/// Recipe-executing capability of an entity.
#[derive(Debug, Clone)]
pub struct Crafter {
    pub speed: f64,
    pub base_productivity: f64,
    pub module_slots: u32,
    pub allowed_effects: EnumSet<ModuleEffect>,
}

impl Default for Crafter {
    fn default() -> Self {
        Self {
            speed: 1.0,
            base_productivity: 0.0,
            module_slots: 0,
            allowed_effects: EnumSet::all(),
        }
    }
}

/// Speed-broadcasting capability of an entity.
#[derive(Debug, Clone)]
pub struct Beacon {
    /// Fraction of hosted module effects transmitted to nearby crafters.
    pub efficiency: f64,
    pub module_slots: u32,
}

/// Transport-belt capability.
#[derive(Debug, Clone)]
pub struct Belt {
    pub items_per_second: f64,
}

/// Inserter capability.
#[derive(Debug, Clone)]
pub struct Inserter {
    pub swing_time: f64,
    pub stack: bool,
}

/// Accumulator capability.
#[derive(Debug, Clone)]
pub struct Accumulator {
    pub capacity_mj: f64,
}

/// Reactor capability.
#[derive(Debug, Clone)]
pub struct Reactor {
    pub neighbor_bonus: f64,
}

/// Container capability.
#[derive(Debug, Clone)]
pub struct Container {
    pub inventory_size: u32,
}

/// A placeable world object. Capabilities live in optional side structs
/// rather than a subtype hierarchy.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub object: ObjectId,
    pub name: Intern<str>,
    pub locale: String,
    /// Footprint edge in tiles, for the logistics size heuristic.
    pub size: u32,
    /// Power draw in MW while working.
    pub power: f64,
    pub crafter: Option<Crafter>,
    pub energy: Option<EntityEnergy>,
    pub beacon: Option<Beacon>,
    /// Capabilities outside the crafting path; the analyses never consult
    /// these, they ride along for display surfaces.
    pub belt: Option<Belt>,
    pub inserter: Option<Inserter>,
    pub accumulator: Option<Accumulator>,
    pub reactor: Option<Reactor>,
    pub container: Option<Container>,
    /// Items that place this entity. Filled from item `place_result` links
    /// by the builder.
    pub items_to_place: Vec<GoodsId>,
    pub map_generated: bool,
    pub map_gen_density: f64,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("recipe {recipe} references goods id {goods} which is not in the catalog")]
    DanglingGoods { recipe: String, goods: u32 },
    #[error("recipe {recipe} names crafter entity id {entity} which is not in the catalog")]
    DanglingCrafter { recipe: String, entity: u32 },
    #[error("recipe {0} has a non-positive crafting time")]
    NonPositiveTime(String),
    #[error("entity {0} is neither map-generated nor placeable by any item")]
    UnplaceableEntity(String),
    #[error("entity {entity} has a negative map generation density")]
    NegativeMapGenDensity { entity: String },
}

/// Immutable, fully-resolved object catalog. Built once after data load;
/// never mutated afterwards. Iteration order is id order and deterministic.
#[derive(Debug)]
pub struct Database {
    goods: Vec<Goods>,
    recipes: Vec<Recipe>,
    technologies: Vec<Technology>,
    entities: Vec<Entity>,
    objects: Vec<ObjectRef>,
    goods_by_name: HashMap<Intern<str>, GoodsId>,
    recipes_by_name: HashMap<Intern<str>, RecipeId>,
    entities_by_name: HashMap<Intern<str>, EntityId>,
    technologies_by_name: HashMap<Intern<str>, TechnologyId>,
    /// Temperature variant lists per fluid base name, ascending.
    fluid_variants: HashMap<Intern<str>, Vec<GoodsId>>,
    /// Total map-generated yield per goods, for the cost upper bound.
    map_generated_amount: HashMap<GoodsId, f64>,
}

impl Database {
    pub fn goods(&self, id: GoodsId) -> &Goods {
        &self.goods[id.index()]
    }

    pub fn recipe(&self, id: RecipeId) -> &Recipe {
        &self.recipes[id.index()]
    }

    pub fn technology(&self, id: TechnologyId) -> &Technology {
        &self.technologies[id.index()]
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.index()]
    }

    pub fn object(&self, id: ObjectId) -> ObjectRef {
        self.objects[id.index()]
    }

    pub fn all_goods(&self) -> impl Iterator<Item = &Goods> {
        self.goods.iter()
    }

    pub fn all_recipes(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }

    pub fn all_technologies(&self) -> impl Iterator<Item = &Technology> {
        self.technologies.iter()
    }

    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn goods_id(&self, name: &str) -> Option<GoodsId> {
        self.goods_by_name.get(&Intern::from(name)).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipes_by_name.get(&Intern::from(name)).copied()
    }

    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.entities_by_name.get(&Intern::from(name)).copied()
    }

    pub fn technology_id(&self, name: &str) -> Option<TechnologyId> {
        self.technologies_by_name.get(&Intern::from(name)).copied()
    }

    /// Temperature variants registered for a fluid base name, ascending.
    pub fn fluid_variants(&self, original_name: Intern<str>) -> &[GoodsId] {
        self.fluid_variants
            .get(&original_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total map-generated yield of a goods, if it has map sources.
    pub fn map_generated_amount(&self, goods: GoodsId) -> Option<f64> {
        self.map_generated_amount.get(&goods).copied()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn goods_mapping<V: Clone>(&self, default: V) -> Mapping<GoodsId, V> {
        Mapping::new(self.goods.len(), default)
    }

    pub fn recipe_mapping<V: Clone>(&self, default: V) -> Mapping<RecipeId, V> {
        Mapping::new(self.recipes.len(), default)
    }

    pub fn object_mapping<V: Clone>(&self, default: V) -> Mapping<ObjectId, V> {
        Mapping::new(self.objects.len(), default)
    }

    /// Localized display name of any object.
    pub fn object_locale(&self, id: ObjectId) -> &str {
        match self.object(id) {
            ObjectRef::Goods(g) => &self.goods(g).locale,
            ObjectRef::Recipe(r) => &self.recipe(r).locale,
            ObjectRef::Technology(t) => &self.technology(t).locale,
            ObjectRef::Entity(e) => &self.entity(e).locale,
        }
    }
}

/// Constructs a [`Database`]. Registration assigns dense ids in insertion
/// order; `build` resolves cross references, fills reverse indexes, and
/// validates the catalog invariants.
#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    goods: Vec<Goods>,
    recipes: Vec<Recipe>,
    technologies: Vec<Technology>,
    entities: Vec<Entity>,
    objects: Vec<ObjectRef>,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_object(&mut self, target: ObjectRef) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(target);
        id
    }

    fn add_goods(&mut self, name: &str, kind: GoodsKind) -> GoodsId {
        let id = GoodsId(self.goods.len() as u32);
        let object = self.next_object(ObjectRef::Goods(id));
        self.goods.push(Goods {
            id,
            object,
            name: Intern::from(name),
            locale: name.replace('-', " "),
            kind,
            usages: Vec::new(),
            production: Vec::new(),
        });
        id
    }

    pub fn add_item(&mut self, name: &str) -> GoodsId {
        self.add_goods(name, GoodsKind::Item(Item::default()))
    }

    pub fn add_fluid(&mut self, name: &str, temperature: f64) -> GoodsId {
        let original = Intern::from(name);
        self.add_goods(
            name,
            GoodsKind::Fluid(Fluid {
                temperature,
                temperature_range: (temperature, temperature),
                heat_capacity: 0.001,
                heat_value: 0.0,
                original_name: original,
                variants: Vec::new(),
            }),
        )
    }

    /// Register an additional temperature variant of an existing fluid. The
    /// variant gets its own goods id but shares the base name for grouping.
    pub fn add_fluid_variant(&mut self, name: &str, temperature: f64) -> GoodsId {
        let original = Intern::from(name);
        let unique = format!("{name}@{temperature}");
        self.add_goods(
            &unique,
            GoodsKind::Fluid(Fluid {
                temperature,
                temperature_range: (temperature, temperature),
                heat_capacity: 0.001,
                heat_value: 0.0,
                original_name: original,
                variants: Vec::new(),
            }),
        )
    }

    pub fn add_special(&mut self, name: &str, is_power: bool, is_research: bool) -> GoodsId {
        self.add_goods(
            name,
            GoodsKind::Special(Special {
                is_power,
                is_research,
            }),
        )
    }

    pub fn add_recipe(&mut self, name: &str, time: f64) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        let object = self.next_object(ObjectRef::Recipe(id));
        self.recipes.push(Recipe {
            id,
            object,
            name: Intern::from(name),
            locale: name.replace('-', " "),
            time,
            enabled: true,
            flags: EnumSet::empty(),
            ingredients: Vec::new(),
            products: Vec::new(),
            crafters: Vec::new(),
            modules: Vec::new(),
            source_entity: None,
            main_product: None,
            technologies: Vec::new(),
        });
        id
    }

    pub fn add_technology(&mut self, name: &str, count: f64) -> TechnologyId {
        let id = TechnologyId(self.technologies.len() as u32);
        let object = self.next_object(ObjectRef::Technology(id));
        self.technologies.push(Technology {
            id,
            object,
            name: Intern::from(name),
            locale: name.replace('-', " "),
            time: 60.0,
            count,
            ingredients: Vec::new(),
            prerequisites: Vec::new(),
            unlock_recipes: Vec::new(),
        });
        id
    }

    pub fn add_entity(&mut self, name: &str) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        let object = self.next_object(ObjectRef::Entity(id));
        self.entities.push(Entity {
            id,
            object,
            name: Intern::from(name),
            locale: name.replace('-', " "),
            size: 3,
            power: 0.0,
            crafter: None,
            energy: None,
            beacon: None,
            belt: None,
            inserter: None,
            accumulator: None,
            reactor: None,
            container: None,
            items_to_place: Vec::new(),
            map_generated: false,
            map_gen_density: 0.0,
        });
        id
    }

    pub fn goods_mut(&mut self, id: GoodsId) -> &mut Goods {
        &mut self.goods[id.index()]
    }

    /// Item capability of a goods; panics if the goods is not an item.
    pub fn item_mut(&mut self, id: GoodsId) -> &mut Item {
        match &mut self.goods[id.index()].kind {
            GoodsKind::Item(item) => item,
            other => panic!("goods {id} is not an item: {other:?}"),
        }
    }

    /// Fluid capability of a goods; panics if the goods is not a fluid.
    pub fn fluid_mut(&mut self, id: GoodsId) -> &mut Fluid {
        match &mut self.goods[id.index()].kind {
            GoodsKind::Fluid(fluid) => fluid,
            other => panic!("goods {id} is not a fluid: {other:?}"),
        }
    }

    pub fn recipe_mut(&mut self, id: RecipeId) -> &mut Recipe {
        &mut self.recipes[id.index()]
    }

    pub fn technology_mut(&mut self, id: TechnologyId) -> &mut Technology {
        &mut self.technologies[id.index()]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    /// Resolve references, fill reverse indexes and variant lists, and
    /// freeze the catalog.
    pub fn build(mut self) -> Result<Database, DatabaseError> {
        let goods_len = self.goods.len() as u32;
        let entities_len = self.entities.len() as u32;

        for recipe in &self.recipes {
            if recipe.time <= 0.0 && !recipe.flags.contains(RecipeFlag::Marker) {
                return Err(DatabaseError::NonPositiveTime(recipe.name.to_string()));
            }
            for goods in recipe
                .ingredients
                .iter()
                .map(|i| i.goods)
                .chain(recipe.products.iter().map(|p| p.goods))
            {
                if goods.0 >= goods_len {
                    return Err(DatabaseError::DanglingGoods {
                        recipe: recipe.name.to_string(),
                        goods: goods.0,
                    });
                }
            }
            for &crafter in &recipe.crafters {
                if crafter.0 >= entities_len {
                    return Err(DatabaseError::DanglingCrafter {
                        recipe: recipe.name.to_string(),
                        entity: crafter.0,
                    });
                }
            }
        }

        // Reverse placement index before the placement validation.
        let placements: Vec<(EntityId, GoodsId)> = self
            .goods
            .iter()
            .filter_map(|g| Some((g.item()?.place_result?, g.id)))
            .collect();
        for (entity, item) in placements {
            self.entities[entity.index()].items_to_place.push(item);
        }

        for entity in &self.entities {
            if entity.map_generated {
                if entity.map_gen_density < 0.0 {
                    return Err(DatabaseError::NegativeMapGenDensity {
                        entity: entity.name.to_string(),
                    });
                }
            } else if entity.items_to_place.is_empty() {
                return Err(DatabaseError::UnplaceableEntity(entity.name.to_string()));
            }
        }

        // Usage and production reverse indexes, in recipe id order.
        let usage_pairs: Vec<(GoodsId, RecipeId)> = self
            .recipes
            .iter()
            .flat_map(|r| r.ingredients.iter().map(move |i| (i.goods, r.id)))
            .collect();
        for (goods, recipe) in usage_pairs {
            self.goods[goods.index()].usages.push(recipe);
        }
        let production_pairs: Vec<(GoodsId, RecipeId)> = self
            .recipes
            .iter()
            .flat_map(|r| r.products.iter().map(move |p| (p.goods, r.id)))
            .collect();
        for (goods, recipe) in production_pairs {
            self.goods[goods.index()].production.push(recipe);
        }

        // Group fluid temperature variants by base name, ascending.
        let mut fluid_variants: HashMap<Intern<str>, Vec<GoodsId>> = HashMap::new();
        for goods in &self.goods {
            if let Some(fluid) = goods.fluid() {
                fluid_variants
                    .entry(fluid.original_name)
                    .or_default()
                    .push(goods.id);
            }
        }
        for variants in fluid_variants.values_mut() {
            variants.sort_by(|&a, &b| {
                let ta = self.goods[a.index()].fluid().unwrap().temperature;
                let tb = self.goods[b.index()].fluid().unwrap().temperature;
                ta.total_cmp(&tb).then(a.cmp(&b))
            });
        }
        for (original, variants) in &fluid_variants {
            for &id in variants {
                match &mut self.goods[id.index()].kind {
                    GoodsKind::Fluid(fluid) if fluid.original_name == *original => {
                        fluid.variants = variants.clone();
                    }
                    _ => {}
                }
            }
        }

        // Total map-generated yield per goods: mining recipes weighted by
        // their source density.
        let mut map_generated_amount: HashMap<GoodsId, f64> = HashMap::new();
        for recipe in &self.recipes {
            let Some(source) = recipe.source_entity else {
                continue;
            };
            let source = &self.entities[source.index()];
            if !source.map_generated {
                continue;
            }
            for product in &recipe.products {
                *map_generated_amount.entry(product.goods).or_default() +=
                    product.amount * source.map_gen_density;
            }
        }

        let goods_by_name = self.goods.iter().map(|g| (g.name, g.id)).collect();
        let recipes_by_name = self.recipes.iter().map(|r| (r.name, r.id)).collect();
        let entities_by_name = self.entities.iter().map(|e| (e.name, e.id)).collect();
        let technologies_by_name = self.technologies.iter().map(|t| (t.name, t.id)).collect();

        Ok(Database {
            goods: self.goods,
            recipes: self.recipes,
            technologies: self.technologies,
            entities: self.entities,
            objects: self.objects,
            goods_by_name,
            recipes_by_name,
            entities_by_name,
            technologies_by_name,
            fluid_variants,
            map_generated_amount,
        })
    }
}
