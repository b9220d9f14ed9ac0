// Copyright 2021, 2022 Zachary Stewart
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{GoodsId, RecipeId, TechnologyId};
use crate::production::{ProductionLink, ProductionTable, RecipeRow};

/// Index of a table in a page's arena.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

impl TableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Address of a row: arena table plus position within that table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub table: TableId,
    pub row: u32,
}

/// Address of a link: arena table plus position within that table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub table: TableId,
    pub link: u32,
}

/// Project-wide knobs consumed by the analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Speed bonus applied to labor-driven crafters (labs).
    #[serde(default)]
    pub research_speed_bonus: f64,
    /// Scales the pollution term of the logistics cost model. 0 disables
    /// pollution costing.
    #[serde(default)]
    pub pollution_cost_modifier: f64,
    /// Focus science-pack usage on a single technology instead of summing
    /// across every accessible one.
    #[serde(default)]
    pub science_target: Option<TechnologyId>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            research_speed_bonus: 0.0,
            pollution_cost_modifier: 0.0,
            science_target: None,
        }
    }
}

/// One user page: a hierarchy of production tables stored in a single
/// arena. Rows point down to subgroups and tables point up to their owner
/// by index, so the owner walk used for link resolution is an index loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPage {
    pub id: Uuid,
    pub name: String,
    pub settings: ProjectSettings,
    pub tables: Vec<ProductionTable>,
}

impl ProjectPage {
    /// The root table of every page.
    pub const ROOT: TableId = TableId(0);

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            settings: ProjectSettings::default(),
            tables: vec![ProductionTable::new(None)],
        }
    }

    pub fn table(&self, id: TableId) -> &ProductionTable {
        &self.tables[id.index()]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut ProductionTable {
        &mut self.tables[id.index()]
    }

    pub fn row(&self, id: RowId) -> &RecipeRow {
        &self.tables[id.table.index()].rows[id.row as usize]
    }

    pub fn row_mut(&mut self, id: RowId) -> &mut RecipeRow {
        &mut self.tables[id.table.index()].rows[id.row as usize]
    }

    pub fn link(&self, id: LinkId) -> &ProductionLink {
        &self.tables[id.table.index()].links[id.link as usize]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut ProductionLink {
        &mut self.tables[id.table.index()].links[id.link as usize]
    }

    pub fn add_row(&mut self, table: TableId, recipe: RecipeId) -> RowId {
        let rows = &mut self.table_mut(table).rows;
        rows.push(RecipeRow::new(recipe));
        RowId {
            table,
            row: (rows.len() - 1) as u32,
        }
    }

    pub fn add_link(&mut self, table: TableId, goods: GoodsId, amount: f64) -> LinkId {
        let links = &mut self.table_mut(table).links;
        links.push(ProductionLink::new(goods, amount));
        LinkId {
            table,
            link: (links.len() - 1) as u32,
        }
    }

    /// Create a nested table under `row` and wire both directions.
    pub fn add_subgroup(&mut self, row: RowId) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(ProductionTable::new(Some(row.table)));
        self.row_mut(row).subgroup = Some(id);
        id
    }

    /// The table whose links a row's goods resolve against first: the row's
    /// subgroup when it has one, otherwise the owning table.
    pub fn link_root(&self, row: RowId) -> TableId {
        self.row(row).subgroup.unwrap_or(row.table)
    }
}
