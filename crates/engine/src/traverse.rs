//! Collection traversal order and test naming

use serde::Serialize;
use tracing::debug;

use chappie_common::{Item, RequestItem};

/// One request leaf in visiting order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedLeaf<'a> {
    /// Folder name in effect when the leaf was reached
    pub folder: String,

    pub test_id: String,

    #[serde(skip)]
    pub item: &'a RequestItem,
}

impl PlannedLeaf<'_> {
    pub fn name(&self) -> &str {
        &self.item.name
    }
}

/// Normalized identifier of a leaf, used for image artifact names
pub fn test_id(folder: &str, name: &str) -> String {
    let raw = if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}-{}", folder, name)
    };
    raw.replace(['/', ' '], "-").to_lowercase()
}

/// Flatten `items` into the order one traversal visits them.
///
/// Siblings are stable-sorted by `seq`. Entering a folder sets the current
/// folder name, and it is not restored on the way back out: a request that
/// follows a folder at a shallower level is still named after the last
/// folder entered.
pub fn plan(items: &[Item]) -> Vec<PlannedLeaf<'_>> {
    let mut folder = String::new();
    let mut leaves = Vec::new();
    walk(items, &mut folder, &mut leaves);
    leaves
}

fn walk<'a>(items: &'a [Item], folder: &mut String, leaves: &mut Vec<PlannedLeaf<'a>>) {
    let mut sorted: Vec<&Item> = items.iter().collect();
    sorted.sort_by_key(|item| item.seq());

    for item in sorted {
        match item {
            Item::Folder(child) => {
                *folder = child.name.clone();
                walk(&child.items, folder, leaves);
            }
            Item::HttpRequest(request) => leaves.push(PlannedLeaf {
                folder: folder.clone(),
                test_id: test_id(folder, &request.name),
                item: request,
            }),
            Item::Unsupported => debug!("Skipping unsupported item"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chappie_common::Collection;
    use test_case::test_case;

    fn collection(json: &str) -> Collection {
        Collection::from_json(json).unwrap()
    }

    fn leaf(name: &str, seq: i64) -> String {
        format!(
            r#"{{ "type": "http-request", "name": "{}", "seq": {}, "request": {{ "url": "http://localhost/", "method": "GET" }} }}"#,
            name, seq
        )
    }

    #[test_case("", "Get todo" => "get-todo"; "no folder")]
    #[test_case("Todos", "Get todo" => "todos-get-todo"; "folder prefix")]
    #[test_case("API/v1", "List All" => "api-v1-list-all"; "slashes and spaces")]
    fn test_test_id(folder: &str, name: &str) -> String {
        test_id(folder, name)
    }

    #[test]
    fn test_siblings_sorted_by_seq() {
        let json = format!(r#"{{ "items": [{}, {}] }}"#, leaf("second", 2), leaf("first", 1));
        let collection = collection(&json);
        let names: Vec<_> = plan(&collection.items).iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_equal_seq_keeps_declaration_order() {
        let json = format!(
            r#"{{ "items": [{}, {}, {}] }}"#,
            leaf("b", 1),
            leaf("a", 1),
            leaf("c", 0)
        );
        let collection = collection(&json);
        let names: Vec<_> = plan(&collection.items).iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, ["c", "b", "a"]);
    }

    #[test]
    fn test_last_folder_name_wins() {
        let json = format!(
            r#"{{ "items": [
                {{ "type": "folder", "name": "Outer", "seq": 1, "items": [
                    {{ "type": "folder", "name": "Inner", "seq": 1, "items": [{}] }},
                    {}
                ] }},
                {}
            ] }}"#,
            leaf("deep", 1),
            leaf("shallow", 2),
            leaf("root", 2)
        );
        let collection = collection(&json);
        let leaves = plan(&collection.items);
        let ids: Vec<_> = leaves.iter().map(|l| l.test_id.as_str()).collect();
        assert_eq!(ids, ["inner-deep", "inner-shallow", "inner-root"]);
        assert_eq!(leaves[2].folder, "Inner");
    }

    #[test]
    fn test_unsupported_items_skipped() {
        let json = format!(
            r#"{{ "items": [{{ "type": "graphql-request", "name": "gql", "seq": 0 }}, {}] }}"#,
            leaf("only", 1)
        );
        let collection = collection(&json);
        assert_eq!(plan(&collection.items).len(), 1);
    }
}
