use std::collections::HashMap;

use crate::action::ActionDescriptor;

/// 每个 action 一份的配置槽。
///
/// 写入分为保留已有值（soft）与强制覆盖（force）两种，
/// 锁定由持有它的 `ControllerSetup` 在每个写入口统一检查。
#[derive(Debug, Clone)]
pub struct AttributeSlot<T> {
    values: HashMap<ActionDescriptor, T>,
}

impl<T: Clone> AttributeSlot<T> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// 向每个目标描述符写入 `value`，返回实际写入的数量
    pub fn set(&mut self, targets: &[ActionDescriptor], value: T, keep_existing: bool) -> usize {
        self.set_with(targets, keep_existing, |_| value.clone())
    }

    /// 按描述符计算写入值，用于布局名随格式后缀变化的情形
    pub fn set_with<F>(&mut self, targets: &[ActionDescriptor], keep_existing: bool, value: F) -> usize
    where
        F: Fn(&ActionDescriptor) -> T,
    {
        let mut written = 0;
        for target in targets {
            if keep_existing && self.values.contains_key(target) {
                continue;
            }
            self.values.insert(target.clone(), value(target));
            written += 1;
        }
        written
    }

    /// 查找顺序：带格式的描述符 → 不带格式的 action → 通配描述符
    pub fn get(&self, descriptor: &ActionDescriptor) -> Option<&T> {
        if let Some(value) = self.values.get(descriptor) {
            return Some(value);
        }
        if descriptor.format().is_some() {
            if let Some(value) = self.values.get(&descriptor.without_format()) {
                return Some(value);
            }
        }
        self.values.get(&ActionDescriptor::wildcard())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Clone> Default for AttributeSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
