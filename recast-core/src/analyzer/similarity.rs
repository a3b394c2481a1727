// Structural similarity: a heuristic, not a proof of equivalence.
//
// "Used in a similar way" and "does the same thing" are undecidable in
// general. They are approximated by rendering trees as indented shape lines
// with symbol names abstracted, then scoring the line diff with `similar`.

use std::collections::HashMap;

use similar::TextDiff;

use recast_model::{NodeId, ProgramModel, ReferenceIndex, SymbolId, SymbolKind};

/// Line-diff ratio in `[0, 1]`; two empty profiles are identical.
pub fn score(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a = a.join("\n");
    let b = b.join("\n");
    f64::from(TextDiff::from_lines(&a, &b).ratio())
}

/// Shape of a method body with its own parameters and locals named by
/// position, and members of its own type named relative to `this`.
pub fn body_profile(model: &ProgramModel, method: SymbolId) -> Vec<String> {
    let Some(body) = model.symbol(method).and_then(|s| s.body) else {
        return Vec::new();
    };
    tree_profile(model, body, method)
}

pub fn tree_profile(model: &ProgramModel, root: NodeId, method: SymbolId) -> Vec<String> {
    let own_type = model.owning_type(method);
    let mut positions: HashMap<SymbolId, String> = HashMap::new();
    for (i, p) in model.params(method).into_iter().enumerate() {
        positions.insert(p, format!("$p{i}"));
    }
    for (i, l) in model.locals(method).into_iter().enumerate() {
        positions.insert(l, format!("$l{i}"));
    }
    let namer = |symbol: SymbolId| -> String {
        if let Some(name) = positions.get(&symbol) {
            return name.clone();
        }
        match model.symbol(symbol) {
            Some(s) if s.owner.is_some() && s.owner == own_type => format!("$self.{}", s.name),
            Some(_) => model.qualified_name(symbol),
            None => symbol.to_string(),
        }
    };
    model.shape_lines(root, &namer)
}

/// How `symbol` is used: one line per use site naming the access and the
/// enclosing node kinds, sorted so that site order does not matter.
pub fn usage_profile(
    model: &ProgramModel,
    index: &ReferenceIndex,
    symbol: SymbolId,
) -> Vec<String> {
    let own_type = model.owning_type(symbol);
    let mut lines: Vec<String> = index
        .users_of(symbol)
        .into_iter()
        .filter_map(|edge| {
            let site = edge.site.node()?;
            let mut context = Vec::new();
            let mut current = site;
            for _ in 0..3 {
                let Some(recast_model::Parent::Node(parent)) = model.parent(current) else {
                    break;
                };
                let parent_node = model.node(parent)?;
                let mut label = parent_node.kind.as_str().to_string();
                if let Some(text) = &parent_node.text {
                    label.push_str(&format!("<{text}>"));
                }
                context.push(label);
                current = parent;
            }
            let enclosing = model.symbol(edge.enclosing)?;
            let within = if enclosing.owner == own_type && enclosing.kind == SymbolKind::Method {
                "own"
            } else {
                "other"
            };
            Some(format!("{} {within} {}", edge.mode.as_str(), context.join("/")))
        })
        .collect();
    lines.sort();
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::ModelBuilder;

    #[test]
    fn identical_profiles_score_one() {
        let lines = vec!["Return".to_string(), "  Reference[$p0]".to_string()];
        assert!((score(&lines, &lines) - 1.0).abs() < 1e-9);
        assert!((score(&[], &[]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sibling_methods_with_renamed_params_look_alike() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let base = b.ty(app, "Base");
        let a = b.subtype(app, "A", base);
        let c = b.subtype(app, "C", base);
        let mut methods = Vec::new();
        for (ty, param) in [(a, "x"), (c, "y")] {
            let f = b.field(ty, "total");
            let m = b.method(ty, "bump");
            let p = b.param(m, param);
            let rf = b.read(f);
            let rp = b.read(p);
            let sum = b.op("+", vec![rf, rp]);
            let assign = b.assign(f, sum);
            b.body(m, vec![assign]);
            methods.push(m);
        }
        let model = b.build().unwrap();
        let pa = body_profile(&model, methods[0]);
        let pc = body_profile(&model, methods[1]);
        assert_eq!(pa, pc);

        let index = ReferenceIndex::build(&model);
        let fa = model.fields(a)[0];
        let fc = model.fields(c)[0];
        let (ua, uc) = (usage_profile(&model, &index, fa), usage_profile(&model, &index, fc));
        assert!(score(&ua, &uc) > 0.99);
    }
}
