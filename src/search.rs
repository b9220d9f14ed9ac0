//! Pure predicates over the object graph and page hierarchy, used by the
//! surrounding UI to filter pages and resolve links outside a solve.

use crate::database::{Database, GoodsId};
use crate::project::{LinkId, ProjectPage, TableId};

/// A whitespace-separated, case-insensitive text query. A text matches when
/// it contains every token.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    tokens: Vec<String>,
}

impl SearchQuery {
    pub fn new(query: &str) -> Self {
        Self {
            tokens: query
                .split_whitespace()
                .map(|token| token.to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.tokens.iter().all(|token| text.contains(token))
    }
}

/// Whether any row or link of a table matches the query, by recipe, entity,
/// fuel, ingredient, or product localized name, walking subgroups.
pub fn table_matches(
    db: &Database,
    page: &ProjectPage,
    table_id: TableId,
    query: &SearchQuery,
) -> bool {
    if query.is_empty() {
        return true;
    }
    let table = page.table(table_id);
    for link in &table.links {
        if query.matches(&db.goods(link.goods).locale) {
            return true;
        }
    }
    for row in &table.rows {
        let recipe = db.recipe(row.recipe);
        if query.matches(&recipe.locale) {
            return true;
        }
        if let Some(entity) = row.entity {
            if query.matches(&db.entity(entity).locale) {
                return true;
            }
        }
        if let Some(fuel) = row.fuel {
            if query.matches(&db.goods(fuel).locale) {
                return true;
            }
        }
        if recipe
            .ingredients
            .iter()
            .map(|i| i.goods)
            .chain(recipe.products.iter().map(|p| p.goods))
            .any(|goods| query.matches(&db.goods(goods).locale))
        {
            return true;
        }
        if let Some(subgroup) = row.subgroup {
            if table_matches(db, page, subgroup, query) {
                return true;
            }
        }
    }
    false
}

/// Resolve a goods to a link by walking the owner chain from `from` to the
/// root. Unlike the solver's link map this scans the link lists directly,
/// so it is valid on a freshly edited page.
pub fn find_link(page: &ProjectPage, from: TableId, goods: GoodsId) -> Option<LinkId> {
    let mut table_id = from;
    loop {
        let table = page.table(table_id);
        if let Some(index) = table.links.iter().position(|link| link.goods == goods) {
            return Some(LinkId {
                table: table_id,
                link: index as u32,
            });
        }
        table_id = table.owner?;
    }
}

/// Whether any enabled row of the table (or a subgroup) burns a fuel that
/// leaves a spent-fuel product behind.
pub fn has_spent_fuel(db: &Database, page: &ProjectPage, table_id: TableId) -> bool {
    for row in &page.table(table_id).rows {
        if !row.enabled {
            continue;
        }
        if row
            .fuel
            .is_some_and(|fuel| db.goods(fuel).fuel_result().is_some())
        {
            return true;
        }
        if let Some(subgroup) = row.subgroup {
            if has_spent_fuel(db, page, subgroup) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fueled_pack;

    fn gear_page(db: &Database) -> (ProjectPage, TableId) {
        let mut page = ProjectPage::new("gears");
        let gear_row = page.add_row(ProjectPage::ROOT, db.recipe_id("iron-gear").unwrap());
        let subgroup = page.add_subgroup(gear_row);
        let plate_row = page.add_row(subgroup, db.recipe_id("iron-plate").unwrap());
        page.row_mut(plate_row).fuel = db.goods_id("coal");
        page.add_link(ProjectPage::ROOT, db.goods_id("iron-gear").unwrap(), 1.0);
        page.add_link(subgroup, db.goods_id("iron-plate").unwrap(), 0.0);
        (page, subgroup)
    }

    #[test]
    fn queries_match_across_subgroups() {
        let db = fueled_pack();
        let (page, _) = gear_page(&db);
        // "iron plate" only appears inside the nested table.
        let query = SearchQuery::new("iron PLATE");
        assert!(table_matches(&db, &page, ProjectPage::ROOT, &query));
        assert!(!table_matches(
            &db,
            &page,
            ProjectPage::ROOT,
            &SearchQuery::new("flux capacitor")
        ));
        // The empty query matches everything.
        assert!(table_matches(
            &db,
            &page,
            ProjectPage::ROOT,
            &SearchQuery::new("  ")
        ));
    }

    #[test]
    fn find_link_walks_the_owner_chain() {
        let db = fueled_pack();
        let (page, subgroup) = gear_page(&db);
        let gear = db.goods_id("iron-gear").unwrap();
        let plate = db.goods_id("iron-plate").unwrap();
        // The gear link lives at the root but resolves from the subgroup.
        let link = find_link(&page, subgroup, gear).unwrap();
        assert_eq!(link.table, ProjectPage::ROOT);
        // The plate link is local to the subgroup.
        let link = find_link(&page, subgroup, plate).unwrap();
        assert_eq!(link.table, subgroup);
        // Unlinked goods resolve to nothing.
        assert!(find_link(&page, subgroup, db.goods_id("coal").unwrap()).is_none());
    }

    #[test]
    fn spent_fuel_detection() {
        let db = fueled_pack();
        let (mut page, subgroup) = gear_page(&db);
        assert!(has_spent_fuel(&db, &page, ProjectPage::ROOT));
        // Disabling the burning row hides it.
        let row = crate::project::RowId {
            table: subgroup,
            row: 0,
        };
        page.row_mut(row).enabled = false;
        assert!(!has_spent_fuel(&db, &page, ProjectPage::ROOT));
    }
}
