//! 组件（分组）模型。
//!
//! 组件可以直接拥有图元，也可以嵌套子组件；包围盒与质心始终是递归拥有的
//! 全部图元的紧致并集，在成员变化时重新计算。`parent_group_id` 非空的组件
//! 是匹配结果，不能再作为种子。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zmeas_core::entity::{EntityId, EntityStore};
use zmeas_core::geometry::{Bounds2D, Point2, normalize_degrees, normalize_radians};

use crate::errors::EngineError;
use crate::matcher::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(u64);

impl ComponentId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 界面显示开关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFlags {
    pub visible: bool,
    pub show_label: bool,
}

impl Default for DisplayFlags {
    fn default() -> Self {
        Self {
            visible: true,
            show_label: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    id: ComponentId,
    name: String,
    display: DisplayFlags,
    entity_ids: BTreeSet<EntityId>,
    child_group_ids: Vec<ComponentId>,
    centroid: Point2,
    bounds: Bounds2D,
    parent_group_id: Option<ComponentId>,
    rotation: f64,
    rotation_deg: f64,
}

impl Component {
    fn new(id: ComponentId, name: String) -> Self {
        Self {
            id,
            name,
            display: DisplayFlags::default(),
            entity_ids: BTreeSet::new(),
            child_group_ids: Vec::new(),
            centroid: Point2::origin(),
            bounds: Bounds2D::empty(),
            parent_group_id: None,
            rotation: 0.0,
            rotation_deg: 0.0,
        }
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn display(&self) -> DisplayFlags {
        self.display
    }

    /// 直接成员。
    #[inline]
    pub fn entity_ids(&self) -> &BTreeSet<EntityId> {
        &self.entity_ids
    }

    #[inline]
    pub fn child_group_ids(&self) -> &[ComponentId] {
        &self.child_group_ids
    }

    /// 紧致包围盒中心；没有任何图元时为原点。
    #[inline]
    pub fn centroid(&self) -> Point2 {
        self.centroid
    }

    #[inline]
    pub fn bounds(&self) -> Bounds2D {
        self.bounds
    }

    #[inline]
    pub fn parent_group_id(&self) -> Option<ComponentId> {
        self.parent_group_id
    }

    #[inline]
    pub fn is_match(&self) -> bool {
        self.parent_group_id.is_some()
    }

    /// 相对种子的旋转角，范围 `[0, 2π)`。
    #[inline]
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    /// 相对种子的旋转角，范围 `[0, 360)`。
    #[inline]
    pub fn rotation_deg(&self) -> f64 {
        self.rotation_deg
    }
}

#[derive(Debug, Default, Clone)]
pub struct ComponentModel {
    components: BTreeMap<ComponentId, Component>,
    owners: HashMap<EntityId, Vec<ComponentId>>,
    next_component_id: u64,
}

impl ComponentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个将被分配的组件 ID（不消耗）。
    #[inline]
    pub fn next_component_id(&self) -> ComponentId {
        ComponentId(self.next_component_id)
    }

    #[inline]
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    #[inline]
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// 顶层组件，即没有 `parent_group_id` 的种子。
    pub fn top_level(&self) -> impl Iterator<Item = &Component> {
        self.components.values().filter(|c| c.parent_group_id.is_none())
    }

    pub fn matches_of(&self, seed: ComponentId) -> impl Iterator<Item = &Component> {
        self.components
            .values()
            .filter(move |c| c.parent_group_id == Some(seed))
    }

    /// 直接拥有该图元的全部组件。一个图元可同时属于多个组件。
    pub fn owners_of(&self, entity: EntityId) -> &[ComponentId] {
        self.owners.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_seed<E, C>(
        &mut self,
        name: impl Into<String>,
        entity_ids: E,
        child_group_ids: C,
        corpus: &EntityStore,
    ) -> Result<ComponentId, EngineError>
    where
        E: IntoIterator<Item = EntityId>,
        C: IntoIterator<Item = ComponentId>,
    {
        let entity_ids = Self::validated_entities(entity_ids, corpus)?;
        let mut children: Vec<ComponentId> = Vec::new();
        for child in child_group_ids {
            if !self.components.contains_key(&child) {
                return Err(EngineError::ComponentNotFound(child.get()));
            }
            if let Some(container) = self.container_of(child) {
                return Err(EngineError::AlreadyNested {
                    parent: container.get(),
                    child: child.get(),
                });
            }
            if !children.contains(&child) {
                children.push(child);
            }
        }

        let id = self.allocate_id();
        let mut component = Component::new(id, name.into());
        component.entity_ids = entity_ids;
        component.child_group_ids = children;
        self.index_entities(id, &component.entity_ids);
        self.components.insert(id, component);
        self.refresh_geometry(id, corpus);
        debug!(component = id.get(), "已创建种子组件");
        Ok(id)
    }

    /// 将匹配结果作为种子的子匹配整体写入。先全部校验，任何一项失败都不修改模型。
    pub fn commit_matches(
        &mut self,
        seed: ComponentId,
        results: Vec<MatchResult>,
        corpus: &EntityStore,
    ) -> Result<Vec<ComponentId>, EngineError> {
        let seed_component = self
            .components
            .get(&seed)
            .ok_or(EngineError::ComponentNotFound(seed.get()))?;
        if seed_component.is_match() {
            return Err(EngineError::MatchCannotBeSeed(seed.get()));
        }
        for result in &results {
            if let Some(missing) = result.entity_ids.iter().find(|id| !corpus.contains(**id)) {
                return Err(EngineError::EntityNotFound(missing.get()));
            }
        }

        let mut committed = Vec::with_capacity(results.len());
        for result in results {
            // 结果 ID 在计算后可能已被占用或回收，此时重新分配
            let id = if result.id.get() < self.next_component_id
                || self.components.contains_key(&result.id)
            {
                self.allocate_id()
            } else {
                self.next_component_id = result.id.get() + 1;
                result.id
            };
            let mut component = Component::new(id, result.name);
            component.entity_ids = result.entity_ids;
            component.parent_group_id = Some(seed);
            component.rotation = normalize_radians(result.rotation);
            component.rotation_deg = normalize_degrees(result.rotation_deg);
            self.index_entities(id, &component.entity_ids);
            self.components.insert(id, component);
            self.refresh_geometry(id, corpus);
            committed.push(id);
        }
        debug!(seed = seed.get(), count = committed.len(), "已写入匹配结果");
        Ok(committed)
    }

    /// 递归展开组件拥有的全部图元。访问集保证即使数据异常也不会无限递归。
    pub fn flatten_entities(&self, id: ComponentId) -> Result<BTreeSet<EntityId>, EngineError> {
        if !self.components.contains_key(&id) {
            return Err(EngineError::ComponentNotFound(id.get()));
        }
        let mut entities = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(component) = self.components.get(&current) {
                entities.extend(component.entity_ids.iter().copied());
                stack.extend(component.child_group_ids.iter().rev().copied());
            }
        }
        Ok(entities)
    }

    pub fn set_entities<E>(
        &mut self,
        id: ComponentId,
        entity_ids: E,
        corpus: &EntityStore,
    ) -> Result<(), EngineError>
    where
        E: IntoIterator<Item = EntityId>,
    {
        let entity_ids = Self::validated_entities(entity_ids, corpus)?;
        let previous = self
            .components
            .get(&id)
            .map(|c| c.entity_ids.clone())
            .ok_or(EngineError::ComponentNotFound(id.get()))?;
        self.unindex_entities(id, &previous);
        self.index_entities(id, &entity_ids);
        if let Some(component) = self.components.get_mut(&id) {
            component.entity_ids = entity_ids;
        }
        self.refresh_geometry(id, corpus);
        Ok(())
    }

    pub fn add_entities<E>(
        &mut self,
        id: ComponentId,
        entity_ids: E,
        corpus: &EntityStore,
    ) -> Result<(), EngineError>
    where
        E: IntoIterator<Item = EntityId>,
    {
        let mut merged = self
            .components
            .get(&id)
            .map(|c| c.entity_ids.clone())
            .ok_or(EngineError::ComponentNotFound(id.get()))?;
        merged.extend(Self::validated_entities(entity_ids, corpus)?);
        self.set_entities(id, merged, corpus)
    }

    pub fn remove_entities<E>(
        &mut self,
        id: ComponentId,
        entity_ids: E,
        corpus: &EntityStore,
    ) -> Result<(), EngineError>
    where
        E: IntoIterator<Item = EntityId>,
    {
        let mut remaining = self
            .components
            .get(&id)
            .map(|c| c.entity_ids.clone())
            .ok_or(EngineError::ComponentNotFound(id.get()))?;
        for entity in entity_ids {
            remaining.remove(&entity);
        }
        self.set_entities(id, remaining, corpus)
    }

    /// 将 `child` 列为子组件的容器组件。嵌套关系是树，每个组件至多有一个容器。
    pub fn container_of(&self, child: ComponentId) -> Option<ComponentId> {
        self.components
            .values()
            .find(|component| component.child_group_ids.contains(&child))
            .map(|component| component.id)
    }

    /// 嵌套子组件。插入时拒绝自引用、成环以及已挂在其他容器下的子组件。
    pub fn add_child(
        &mut self,
        parent: ComponentId,
        child: ComponentId,
        corpus: &EntityStore,
    ) -> Result<(), EngineError> {
        if !self.components.contains_key(&parent) {
            return Err(EngineError::ComponentNotFound(parent.get()));
        }
        if !self.components.contains_key(&child) {
            return Err(EngineError::ComponentNotFound(child.get()));
        }
        if parent == child {
            return Err(EngineError::SelfReference(parent.get()));
        }
        match self.container_of(child) {
            Some(container) if container == parent => return Ok(()),
            Some(container) => {
                return Err(EngineError::AlreadyNested {
                    parent: container.get(),
                    child: child.get(),
                });
            }
            None => {}
        }
        if self.descendants(child).contains(&parent) {
            return Err(EngineError::CycleDetected {
                parent: parent.get(),
                child: child.get(),
            });
        }
        if let Some(component) = self.components.get_mut(&parent) {
            component.child_group_ids.push(child);
        }
        self.refresh_geometry(parent, corpus);
        Ok(())
    }

    /// 移除嵌套关系，返回之前是否存在。
    pub fn remove_child(
        &mut self,
        parent: ComponentId,
        child: ComponentId,
        corpus: &EntityStore,
    ) -> Result<bool, EngineError> {
        let component = self
            .components
            .get_mut(&parent)
            .ok_or(EngineError::ComponentNotFound(parent.get()))?;
        let before = component.child_group_ids.len();
        component.child_group_ids.retain(|id| *id != child);
        let removed = component.child_group_ids.len() != before;
        if removed {
            self.refresh_geometry(parent, corpus);
        }
        Ok(removed)
    }

    pub fn rename(&mut self, id: ComponentId, name: impl Into<String>) -> Result<(), EngineError> {
        let component = self
            .components
            .get_mut(&id)
            .ok_or(EngineError::ComponentNotFound(id.get()))?;
        component.name = name.into();
        Ok(())
    }

    pub fn set_display_flags(
        &mut self,
        id: ComponentId,
        flags: DisplayFlags,
    ) -> Result<(), EngineError> {
        let component = self
            .components
            .get_mut(&id)
            .ok_or(EngineError::ComponentNotFound(id.get()))?;
        component.display = flags;
        Ok(())
    }

    /// 删除组件，并级联删除其全部匹配；同时从其他组件的子组件列表中剔除。
    /// 返回被删除的组件 ID（先本体，后匹配）。
    pub fn delete(
        &mut self,
        id: ComponentId,
        corpus: &EntityStore,
    ) -> Result<Vec<ComponentId>, EngineError> {
        if !self.components.contains_key(&id) {
            return Err(EngineError::ComponentNotFound(id.get()));
        }
        let mut removed = vec![id];
        removed.extend(self.matches_of(id).map(Component::id));

        for victim in &removed {
            if let Some(component) = self.components.remove(victim) {
                self.unindex_entities(*victim, &component.entity_ids);
            }
        }

        let affected: Vec<ComponentId> = self
            .components
            .values_mut()
            .filter_map(|component| {
                let before = component.child_group_ids.len();
                component
                    .child_group_ids
                    .retain(|child| !removed.contains(child));
                (component.child_group_ids.len() != before).then_some(component.id)
            })
            .collect();
        for parent in affected {
            self.refresh_geometry(parent, corpus);
        }

        debug!(component = id.get(), removed = removed.len(), "已删除组件");
        Ok(removed)
    }

    fn validated_entities<E>(
        entity_ids: E,
        corpus: &EntityStore,
    ) -> Result<BTreeSet<EntityId>, EngineError>
    where
        E: IntoIterator<Item = EntityId>,
    {
        let mut set = BTreeSet::new();
        for entity in entity_ids {
            if !corpus.contains(entity) {
                return Err(EngineError::EntityNotFound(entity.get()));
            }
            set.insert(entity);
        }
        Ok(set)
    }

    /// `root` 可达的所有组件（含自身）。
    fn descendants(&self, root: ComponentId) -> HashSet<ComponentId> {
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(component) = self.components.get(&current) {
                stack.extend(component.child_group_ids.iter().copied());
            }
        }
        visited
    }

    /// 重算组件及所有包含它的祖先的包围盒与质心。
    fn refresh_geometry(&mut self, id: ComponentId, corpus: &EntityStore) {
        let mut queue = VecDeque::from([id]);
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Ok(entities) = self.flatten_entities(current) else {
                continue;
            };
            let mut bounds = Bounds2D::empty();
            for entity in entities.iter().filter_map(|id| corpus.entity(*id)) {
                bounds.include_bounds(&entity.bounds());
            }
            if let Some(component) = self.components.get_mut(&current) {
                component.bounds = bounds;
                component.centroid = if bounds.is_empty() {
                    Point2::origin()
                } else {
                    bounds.center()
                };
            }
            queue.extend(
                self.components
                    .values()
                    .filter(|c| c.child_group_ids.contains(&current))
                    .map(Component::id),
            );
        }
    }

    fn index_entities(&mut self, id: ComponentId, entities: &BTreeSet<EntityId>) {
        for entity in entities {
            let owners = self.owners.entry(*entity).or_default();
            if !owners.contains(&id) {
                owners.push(id);
            }
        }
    }

    fn unindex_entities(&mut self, id: ComponentId, entities: &BTreeSet<EntityId>) {
        for entity in entities {
            if let Some(owners) = self.owners.get_mut(entity) {
                owners.retain(|owner| *owner != id);
                if owners.is_empty() {
                    self.owners.remove(entity);
                }
            }
        }
    }

    #[inline]
    fn allocate_id(&mut self) -> ComponentId {
        let id = self.next_component_id;
        self.next_component_id += 1;
        ComponentId(id)
    }
}
