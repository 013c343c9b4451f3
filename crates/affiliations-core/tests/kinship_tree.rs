//! Kinship graph invariants and the generated tree layout.

mod common;

use affiliations_core::{LedgerError, TreeOptions};
use records::RelationKind;

use common::kernel;

const GUILD: u64 = 42;

#[test]
fn kin_edges_stay_acyclic() {
    let (mut kernel, _) = kernel();
    kernel.add_kin_edge(1, 2).unwrap();
    kernel.add_kin_edge(2, 3).unwrap();

    let err = kernel.add_kin_edge(3, 1).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::KinshipCycle { parent_id: 3, child_id: 1 }
    ));
    let err = kernel.add_kin_edge(5, 5).unwrap_err();
    assert!(matches!(err, LedgerError::KinshipCycle { .. }));

    // Duplicates are quietly absorbed.
    kernel.add_kin_edge(1, 2).unwrap();
    assert_eq!(kernel.children_of(1).unwrap(), vec![2]);

    kernel.remove_kin_edge(2, 3).unwrap();
    assert!(kernel.children_of(2).unwrap().is_empty());
}

#[test]
fn tree_layout_stacks_generations() {
    let (mut kernel, _) = kernel();
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Family, &[1, 2, 3, 4], true, Some("Dupont"))
        .unwrap();
    // 1 and 2 are the founding couple, 3 their child, 4 a grandchild.
    kernel.add_kin_edge(1, 3).unwrap();
    kernel.add_kin_edge(2, 3).unwrap();
    kernel.add_kin_edge(3, 4).unwrap();
    // An edge to someone outside the family must not leak into the layout.
    kernel.add_kin_edge(1, 99).unwrap();

    let layout = kernel
        .tree_layout(GUILD, "dupont", &TreeOptions::default())
        .unwrap();
    assert_eq!(layout.rel_id, rel_id);
    assert_eq!(layout.family_name, "Dupont");
    assert_eq!(layout.levels.len(), 3);
    assert_eq!(layout.levels[0].members, vec!["1", "2"]);
    assert_eq!(layout.levels[1].members, vec!["3"]);
    assert_eq!(layout.levels[2].members, vec!["4"]);
    assert_eq!(layout.edges.len(), 3);
    assert_eq!(layout.style.theme, "kawaii");
}

#[test]
fn tree_style_honors_overrides_and_rtl_ordering() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Family, &[5, 6, 7], true, Some("Martin"))
        .unwrap();

    let options = TreeOptions {
        theme: Some("royal".to_string()),
        rtl: Some(true),
        avatars: Some(false),
    };
    let layout = kernel.tree_layout(GUILD, "martin", &options).unwrap();
    assert_eq!(layout.style.theme, "royal");
    assert!(layout.style.rtl);
    assert!(!layout.style.avatars);
    assert_eq!(layout.levels[0].members, vec!["7", "6", "5"]);

    // Unknown themes fall back to the default instead of failing.
    let options = TreeOptions { theme: Some("vaporwave".to_string()), ..Default::default() };
    let layout = kernel.tree_layout(GUILD, "martin", &options).unwrap();
    assert_eq!(layout.style.theme, "kawaii");
}
