pub use border::{borders, Border};

mod border;


use flint_common::ir::{DomTree, Graph};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegisterSet};
use log::{info, trace};

use crate::live::liveness;
use crate::{get_reg, set_reg};

/// Chordal register assignment: walk the dominator tree in preorder
/// and color each block's border list front to back with a first-fit
/// over the free registers. Values precolored by the constraint phase
/// keep their register; live-in values were colored in a dominator.
/// Running out of colors means the spiller broke its pressure bound.
pub fn assign(graph: &mut Graph, target: &Target, class: ClassId) {
    let cls = target.class(class);
    info!("chordal coloring class {}", cls.name);

    let live = liveness(graph);
    let dom = DomTree::compute(graph);
    let allocatable = cls.allocatable();

    for block in dom.preorder().to_vec() {
        trace!("assigning colors in {}", block);
        let mut colors = RegisterSet::EMPTY;

        for border in borders(graph, class, &live, block) {
            let value = border.value;

            if !border.is_def {
                // A last use frees its register.
                let reg = get_reg(graph, value)
                    .unwrap_or_else(|| panic!("used value {} has no register", value));
                colors.remove(reg);
                continue;
            }

            if !border.is_real {
                let reg = get_reg(graph, value)
                    .unwrap_or_else(|| panic!("live-in value {} has no register", value));
                colors.insert(reg);
                continue;
            }

            let reg = match get_reg(graph, value) {
                Some(reg) => {
                    assert!(
                        !colors.contains(reg),
                        "precolored register {} of {} is already taken",
                        cls.register(reg).name,
                        value
                    );
                    reg
                }
                None => {
                    let reg = allocatable.difference(colors).first().unwrap_or_else(|| {
                        panic!(
                            "no free register for {} in {}, the spiller must bound the pressure",
                            value, block
                        )
                    });
                    set_reg(graph, value, reg);
                    reg
                }
            };

            trace!("  {} -> {}", value, cls.register(reg).name);
            colors.insert(reg);
        }
    }
}
