// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use std::collections::{BTreeMap, BTreeSet};

use crate::database::{Database, GoodsId};
use crate::project::{LinkId, ProjectPage, RowId, TableId};

use super::LinkFlag;

const FLOW_EPSILON: f64 = 1e-9;

/// Fluids are compared in 50-unit stacks so the display ordering follows
/// visual magnitude.
const FLUID_STACK: f64 = 50.0;

/// One line of a table's per-goods flow summary. Positive amounts are net
/// production, negative net consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowEntry {
    pub goods: GoodsId,
    pub amount: f64,
    /// The table's own link on this goods, when one exists.
    pub link: Option<LinkId>,
}

/// Roll production and consumption per goods up the subgroup hierarchy and
/// sort each table's flow for display. Matched links absorb their goods;
/// everything else folds into the enclosing table.
pub(super) fn aggregate(db: &Database, page: &mut ProjectPage, root: TableId) {
    aggregate_table(db, page, root);
}

fn display_amount(db: &Database, goods: GoodsId, amount: f64) -> f64 {
    if db.goods(goods).is_fluid() {
        amount / FLUID_STACK
    } else {
        amount
    }
}

/// Nearest link on `goods` above `from` that participated as matched in the
/// last solve.
fn find_enclosing_matched(page: &ProjectPage, from: TableId, goods: GoodsId) -> Option<LinkId> {
    let mut table_id = page.table(from).owner?;
    loop {
        let table = page.table(table_id);
        if let Some(&index) = table.link_map.get(&goods) {
            let link_id = LinkId {
                table: table_id,
                link: index,
            };
            if !page.link(link_id).flags.contains(LinkFlag::NotMatched) {
                return Some(link_id);
            }
        }
        table_id = table.owner?;
    }
}

/// Returns the residual per-goods flow this table pushes into its owner.
fn aggregate_table(db: &Database, page: &mut ProjectPage, table_id: TableId) -> Vec<(GoodsId, f64)> {
    let mut production: BTreeMap<GoodsId, f64> = BTreeMap::new();
    let mut consumption: BTreeMap<GoodsId, f64> = BTreeMap::new();

    for row_index in 0..page.table(table_id).rows.len() {
        let row_id = RowId {
            table: table_id,
            row: row_index as u32,
        };
        if !page.row(row_id).enabled {
            continue;
        }
        if let Some(subgroup) = page.row(row_id).subgroup {
            for (goods, net) in aggregate_table(db, page, subgroup) {
                if net > 0.0 {
                    *production.entry(goods).or_default() += net;
                } else {
                    *consumption.entry(goods).or_default() += -net;
                }
            }
        }

        let row = page.row(row_id);
        let rps = row.recipes_per_second;
        let params = row.parameters;
        let recipe = db.recipe(row.recipe);
        for product in &recipe.products {
            *production.entry(product.goods).or_default() +=
                rps * product.amount_with_productivity(params.productivity);
        }
        for (index, ingredient) in recipe.ingredients.iter().enumerate() {
            let goods =
                ingredient.resolve_variant(row.variant_picks.get(&(index as u32)).copied());
            *consumption.entry(goods).or_default() += rps * ingredient.amount;
        }
        if let Some(fuel) = row.fuel {
            let per_recipe = params.fuel_usage_per_second_per_recipe;
            if per_recipe.is_finite() {
                *consumption.entry(fuel).or_default() += per_recipe * rps;
                if let Some(spent) = db.goods(fuel).fuel_result() {
                    *production.entry(spent).or_default() += per_recipe * rps;
                }
            }
        }
    }

    let goods_ids: BTreeSet<GoodsId> = production
        .keys()
        .chain(consumption.keys())
        .copied()
        .collect();

    let mut entries: Vec<FlowEntry> = Vec::new();
    let mut residuals: Vec<(GoodsId, f64)> = Vec::new();
    let mut child_not_matched: Vec<LinkId> = Vec::new();
    let mut link_flows: Vec<(LinkId, f64)> = Vec::new();

    {
        let table = page.table(table_id);
        for goods in goods_ids {
            let prod = production.get(&goods).copied().unwrap_or(0.0);
            let cons = consumption.get(&goods).copied().unwrap_or(0.0);
            let net = prod - cons;
            let local = table.link_map.get(&goods).map(|&index| LinkId {
                table: table_id,
                link: index,
            });
            if net.abs() > FLOW_EPSILON {
                entries.push(FlowEntry {
                    goods,
                    amount: net,
                    link: local,
                });
            }
            let absorbed = local.is_some_and(|link_id| {
                let flags = page.link(link_id).flags;
                !flags.contains(LinkFlag::NotMatched) || flags.contains(LinkFlag::ChildNotMatched)
            });
            if !absorbed && net.abs() > FLOW_EPSILON {
                residuals.push((goods, net));
                if local.is_some() {
                    if let Some(enclosing) = find_enclosing_matched(page, table_id, goods) {
                        child_not_matched.push(enclosing);
                    }
                }
            }
        }
        for (index, link) in table.links.iter().enumerate() {
            link_flows.push((
                LinkId {
                    table: table_id,
                    link: index as u32,
                },
                production.get(&link.goods).copied().unwrap_or(0.0),
            ));
        }
    }

    for (link_id, flow) in link_flows {
        page.link_mut(link_id).link_flow = flow;
    }
    for link_id in child_not_matched {
        page.link_mut(link_id).flags |= LinkFlag::ChildNotMatched | LinkFlag::NotMatched;
    }

    entries.sort_by(|a, b| {
        display_amount(db, a.goods, a.amount)
            .total_cmp(&display_amount(db, b.goods, b.amount))
            .then(a.goods.cmp(&b.goods))
    });
    page.table_mut(table_id).flow = entries;

    residuals
}

#[cfg(test)]
mod tests {
    use crate::cost::CostAnalysis;
    use crate::database::{Crafter, Database, DatabaseBuilder, EntityEnergy, Ingredient, Product};
    use crate::milestones::FullAccess;
    use crate::production::solve_page;
    use crate::project::{ProjectPage, ProjectSettings};

    /// Water and steam move in the hundreds while items move in ones; the
    /// stack rule keeps the display order comparable.
    fn boiler_db() -> Database {
        let mut b = DatabaseBuilder::new();
        let water = b.add_fluid("water", 15.0);
        let steam = b.add_fluid("steam", 165.0);
        let widget = b.add_item("widget");

        let machine = b.add_entity("machine");
        b.entity_mut(machine).crafter = Some(Crafter::default());
        b.entity_mut(machine).power = 0.2;
        b.entity_mut(machine).energy = Some(EntityEnergy::default());
        let machine_item = b.add_item("machine-item");
        b.item_mut(machine_item).place_result = Some(machine);

        let well = b.add_entity("water-well");
        b.entity_mut(well).map_generated = true;
        b.entity_mut(well).map_gen_density = 1000.0;
        let pump = b.add_recipe("pump-water", 1.0);
        b.recipe_mut(pump).products.push(Product::new(water, 60.0));
        b.recipe_mut(pump).crafters.push(machine);
        b.recipe_mut(pump).source_entity = Some(well);

        let boil = b.add_recipe("boil-water", 1.0);
        b.recipe_mut(boil).ingredients.push(Ingredient::new(water, 60.0));
        b.recipe_mut(boil).products.push(Product::new(steam, 60.0));
        b.recipe_mut(boil).crafters.push(machine);

        let stamp = b.add_recipe("stamp-widget", 1.0);
        b.recipe_mut(stamp).products.push(Product::new(widget, 2.0));
        b.recipe_mut(stamp).crafters.push(machine);

        b.build().unwrap()
    }

    #[test]
    fn fluids_sort_in_stacks() {
        let db = boiler_db();
        let costs = CostAnalysis::new(&db, &FullAccess, &ProjectSettings::default(), false);
        let mut page = ProjectPage::new("boilers");
        let machine = db.entity_id("machine");
        let boil = page.add_row(ProjectPage::ROOT, db.recipe_id("boil-water").unwrap());
        page.row_mut(boil).entity = machine;
        let stamp = page.add_row(ProjectPage::ROOT, db.recipe_id("stamp-widget").unwrap());
        page.row_mut(stamp).entity = machine;
        page.add_link(ProjectPage::ROOT, db.goods_id("steam").unwrap(), 60.0);
        page.add_link(ProjectPage::ROOT, db.goods_id("widget").unwrap(), 2.0);

        solve_page(&db, &costs, &mut page).unwrap();

        // 60 steam compares as 1.2 stacks, below 2 widgets; without the
        // stack rule steam would sort after the widgets.
        let order: Vec<_> = page
            .table(ProjectPage::ROOT)
            .flow
            .iter()
            .map(|entry| entry.goods)
            .collect();
        assert_eq!(
            order,
            vec![
                db.goods_id("water").unwrap(),
                db.goods_id("steam").unwrap(),
                db.goods_id("widget").unwrap(),
            ]
        );
    }
}
