use std::collections::HashMap;

use crate::action::ActionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Before,
    After,
}

#[derive(Clone)]
struct HookEntry<C> {
    priority: i32,
    callback: C,
}

/// 按 (位置, 描述符) 存放的回调列表。
///
/// 查询结果不做缓存，每次都由通配列表与具体列表重新拼接排序，
/// 后续 setup 追加的高优先级回调因此立刻生效。
#[derive(Clone)]
pub struct HookRegistry<C> {
    lists: HashMap<(Position, ActionDescriptor), Vec<HookEntry<C>>>,
}

impl<C: Clone> HookRegistry<C> {
    pub fn new() -> Self {
        Self {
            lists: HashMap::new(),
        }
    }

    pub fn add(
        &mut self,
        position: Position,
        priority: i32,
        targets: &[ActionDescriptor],
        callback: C,
    ) {
        for target in targets {
            self.lists
                .entry((position, target.clone()))
                .or_default()
                .push(HookEntry {
                    priority,
                    callback: callback.clone(),
                });
        }
    }

    /// 通配列表、action 列表、带格式的 action 列表依次拼接，再按优先级降序稳定排序
    pub fn query(&self, position: Position, descriptor: &ActionDescriptor) -> Vec<C> {
        let mut keys = vec![ActionDescriptor::wildcard()];
        if !descriptor.is_wildcard() {
            keys.push(descriptor.without_format());
            if descriptor.format().is_some() {
                keys.push(descriptor.clone());
            }
        }
        let mut entries: Vec<&HookEntry<C>> = keys
            .into_iter()
            .filter_map(|k| self.lists.get(&(position, k)))
            .flatten()
            .collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries.into_iter().map(|e| e.callback.clone()).collect()
    }

    pub fn len(&self, position: Position, descriptor: &ActionDescriptor) -> usize {
        self.query(position, descriptor).len()
    }
}

impl<C: Clone> Default for HookRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
