use super::cursor::{BTreeCursor, KeyRange};
use super::node::{Node, MAX_KEY_SIZE};
use crate::bins::SliceExt;
use crate::error::StorageError;
use crate::id::{PageNum, Rid};
use crate::paged_file::{self, FileHandle, PAGE_SIZE};
use crate::schema::{Attribute, Value};
use anyhow::anyhow;
use indexmap::IndexMap;
use std::fmt::Write;
use std::path::Path;

const ROOT_POINTER_PAGE: PageNum = 0;
const INITIAL_ROOT: PageNum = 1;
const INITIAL_LEAF: PageNum = 2;

/// Result of inserting into a subtree.
enum InsertOutcome {
    NoSplit,
    /// The subtree root split; `page` is the new right sibling and `key` the
    /// separator the parent must take.
    Split { key: Value, page: PageNum },
}

/// B+-tree over one attribute, mapping keys to record rids.
///
/// Page 0 holds the root page number. Descent always takes the child left of
/// the first separator that is not less than the search key, so the leaf
/// reached for a key is the leftmost one that may contain it. Deletes never
/// merge or rebalance pages.
#[derive(Clone)]
pub struct BTreeIndex {
    file: FileHandle,
    attr: Attribute,
}

impl BTreeIndex {
    /// Creates an index file: the root pointer page, an interior root and one empty leaf.
    pub fn create_file(path: &Path) -> anyhow::Result<()> {
        paged_file::create_file(path)?;
        let file = FileHandle::open(path)?;
        let mut root_pointer = [0u8; PAGE_SIZE];
        root_pointer.write_u32(INITIAL_ROOT);
        file.append_page(&root_pointer)?;
        Node::new_interior(INITIAL_LEAF).append(&file)?;
        Node::new_leaf(0, 0).append(&file)?;
        file.close()
    }

    pub fn destroy_file(path: &Path) -> anyhow::Result<()> {
        paged_file::destroy_file(path)
    }

    pub fn open(path: &Path, attr: Attribute) -> anyhow::Result<Self> {
        Ok(Self::new(FileHandle::open(path)?, attr))
    }

    pub fn new(file: FileHandle, attr: Attribute) -> Self {
        Self { file, attr }
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attr
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    pub fn close(self) -> anyhow::Result<()> {
        self.file.close()
    }

    pub fn root(&self) -> anyhow::Result<PageNum> {
        let mut page = [0u8; PAGE_SIZE];
        self.file.read_page(ROOT_POINTER_PAGE, &mut page)?;
        Ok(page.read_u32())
    }

    fn set_root(&self, root: PageNum) -> anyhow::Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        page.write_u32(root);
        self.file.write_page(ROOT_POINTER_PAGE, &page)
    }

    /// Rejects keys that `insert_entry` could not store for `attr`.
    pub(crate) fn check_key(attr: &Attribute, key: &Value) -> anyhow::Result<()> {
        key.check_type(attr)?;
        if let Value::VarChar(bytes) = key {
            if bytes.len() > MAX_KEY_SIZE {
                return Err(StorageError::KeyTooLarge(bytes.len()).into());
            }
        }
        Ok(())
    }

    pub fn insert_entry(&self, key: &Value, rid: Rid) -> anyhow::Result<()> {
        Self::check_key(&self.attr, key)?;
        let root = self.root()?;
        let InsertOutcome::Split { key: promoted, page } = self.insert_into(root, key, rid)? else {
            return Ok(());
        };

        let mut new_root = Node::new_interior(root);
        if !new_root.try_insert(0, &promoted, &page.to_ne_bytes()) {
            return Err(anyhow!("separator does not fit in an empty root"));
        }
        let new_root_page = new_root.append(&self.file)?;
        self.set_root(new_root_page)?;
        log::debug!("grow index root old_root={root} new_root={new_root_page}");
        Ok(())
    }

    fn insert_into(
        &self,
        page_num: PageNum,
        key: &Value,
        rid: Rid,
    ) -> anyhow::Result<InsertOutcome> {
        let attr_type = self.attr.attr_type;
        let mut node = Node::load(&self.file, page_num)?;

        if node.is_leaf() {
            // after every equal key, so duplicates keep insertion order within a leaf
            let pos = node.upper_bound(attr_type, key)?;
            if node.try_insert(pos, key, &rid.to_ne_bytes()) {
                node.store(&self.file, page_num)?;
                return Ok(InsertOutcome::NoSplit);
            }
            return self.split_leaf(page_num, node, pos, key, rid);
        }

        let pos = node.lower_bound(attr_type, Some(key))?;
        let child = node.child(pos);
        let InsertOutcome::Split {
            key: promoted,
            page: new_child,
        } = self.insert_into(child, key, rid)?
        else {
            return Ok(InsertOutcome::NoSplit);
        };

        // the new sibling sits right after `child`
        if node.try_insert(pos, &promoted, &new_child.to_ne_bytes()) {
            node.store(&self.file, page_num)?;
            return Ok(InsertOutcome::NoSplit);
        }
        self.split_interior(page_num, node, pos, &promoted, new_child)
    }

    fn split_leaf(
        &self,
        page_num: PageNum,
        node: Node,
        pos: usize,
        key: &Value,
        rid: Rid,
    ) -> anyhow::Result<InsertOutcome> {
        let mut entries = node.entries(self.attr.attr_type)?;
        entries.insert(pos, (key.clone(), rid.to_ne_bytes().to_vec()));
        let at = split_point(&node, &entries);
        let right_entries = entries.split_off(at);
        let promoted = right_entries[0].0.clone();

        let old_next = node.next();
        let mut right = Node::new_leaf(page_num, old_next);
        fill(&mut right, &right_entries)?;
        let right_page = right.append(&self.file)?;

        let mut left = Node::new_leaf(node.prev(), right_page);
        fill(&mut left, &entries)?;
        left.store(&self.file, page_num)?;

        if old_next != 0 {
            let mut next = Node::load(&self.file, old_next)?;
            next.set_prev(right_page);
            next.store(&self.file, old_next)?;
        }

        log::debug!(
            "split leaf page={page_num} new_page={right_page} left={} right={}",
            entries.len(),
            right_entries.len()
        );
        Ok(InsertOutcome::Split {
            key: promoted,
            page: right_page,
        })
    }

    fn split_interior(
        &self,
        page_num: PageNum,
        node: Node,
        pos: usize,
        key: &Value,
        child: PageNum,
    ) -> anyhow::Result<InsertOutcome> {
        let mut entries = node.entries(self.attr.attr_type)?;
        entries.insert(pos, (key.clone(), child.to_ne_bytes().to_vec()));
        let at = split_point(&node, &entries);
        let mut right_entries = entries.split_off(at);
        let (promoted, middle_child) = right_entries.remove(0);

        let mut right = Node::new_interior(middle_child.read_u32());
        fill(&mut right, &right_entries)?;
        let right_page = right.append(&self.file)?;

        let mut left = Node::new_interior(node.left_child());
        fill(&mut left, &entries)?;
        left.store(&self.file, page_num)?;

        log::debug!(
            "split interior page={page_num} new_page={right_page} left={} right={}",
            entries.len(),
            right_entries.len()
        );
        Ok(InsertOutcome::Split {
            key: promoted,
            page: right_page,
        })
    }

    /// Removes the entry matching both `key` and `rid`. Other entries with
    /// the same key stay.
    pub fn delete_entry(&self, key: &Value, rid: Rid) -> anyhow::Result<()> {
        key.check_type(&self.attr)?;
        let attr_type = self.attr.attr_type;
        let (mut page_num, mut node) = self.find_leaf(Some(key))?;
        let mut i = node.lower_bound(attr_type, Some(key))?;

        loop {
            while i < node.count() {
                if node.key(attr_type, i)?.key_cmp(key).is_gt() {
                    return Err(entry_not_found(key, rid));
                }
                if node.rid(i) == rid {
                    node.remove(attr_type, i);
                    node.store(&self.file, page_num)?;
                    log::trace!("delete index entry key={key} rid={rid} page={page_num}");
                    return Ok(());
                }
                i += 1;
            }

            // duplicates of `key` may continue on the next leaf
            let next = node.next();
            if next == 0 {
                return Err(entry_not_found(key, rid));
            }
            page_num = next;
            node = Node::load(&self.file, next)?;
            i = 0;
        }
    }

    /// Descends to the leftmost leaf that may contain `key`; `None` reaches
    /// the leftmost leaf of the tree.
    fn find_leaf(&self, key: Option<&Value>) -> anyhow::Result<(PageNum, Node)> {
        let attr_type = self.attr.attr_type;
        let mut page_num = self.root()?;
        loop {
            let node = Node::load(&self.file, page_num)?;
            if node.is_leaf() {
                return Ok((page_num, node));
            }
            page_num = node.child(node.lower_bound(attr_type, key)?);
        }
    }

    pub fn scan(
        &self,
        low: Option<&Value>,
        high: Option<&Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> anyhow::Result<BTreeCursor> {
        for key in low.iter().chain(high.iter()) {
            key.check_type(&self.attr)?;
        }
        let (_, leaf) = self.find_leaf(low)?;
        let index = leaf.lower_bound(self.attr.attr_type, low)?;
        let range = KeyRange {
            low: low.cloned(),
            low_inclusive,
            high: high.cloned(),
            high_inclusive,
        };
        Ok(BTreeCursor::new(
            self.file.clone(),
            self.attr.attr_type,
            range,
            leaf,
            index,
        ))
    }

    /// Number of levels from the root down to the leaves.
    pub fn height(&self) -> anyhow::Result<usize> {
        let mut height = 1;
        let mut node = Node::load(&self.file, self.root()?)?;
        while !node.is_leaf() {
            node = Node::load(&self.file, node.child(0))?;
            height += 1;
        }
        Ok(height)
    }

    /// Pre-order JSON dump of the tree. Leaf keys are listed once with all their rids.
    pub fn print_btree(&self) -> anyhow::Result<String> {
        self.print_page(self.root()?)
    }

    /// The subtree rooted at `page`, in the same format as [`Self::print_btree`].
    pub fn print_page(&self, page: PageNum) -> anyhow::Result<String> {
        let mut out = String::new();
        self.print_node(page, 0, &mut out)?;
        out.push('\n');
        Ok(out)
    }

    fn print_node(&self, page_num: PageNum, depth: usize, out: &mut String) -> anyhow::Result<()> {
        let attr_type = self.attr.attr_type;
        let node = Node::load(&self.file, page_num)?;
        let indent = "    ".repeat(depth);

        if node.is_leaf() {
            let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
            for i in 0..node.count() {
                let key = node.key(attr_type, i)?.to_string();
                groups.entry(key).or_default().push(node.rid(i).to_string());
            }
            let keys: Vec<String> = groups
                .iter()
                .map(|(key, rids)| format!("\"{key}:[{}]\"", rids.join(",")))
                .collect();
            write!(out, "{indent}{{\"keys\": [{}]}}", keys.join(","))?;
            return Ok(());
        }

        let keys = (0..node.count())
            .map(|i| Ok(format!("\"{}\"", node.key(attr_type, i)?)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        writeln!(out, "{indent}{{\"keys\": [{}],", keys.join(","))?;
        writeln!(out, "{indent} \"children\": [")?;
        for i in 0..=node.count() {
            self.print_node(node.child(i), depth + 1, out)?;
            if i < node.count() {
                out.push(',');
            }
            out.push('\n');
        }
        write!(out, "{indent}]}}")?;
        Ok(())
    }
}

/// Index where the entries split: the smallest prefix filling at least half
/// a page, leaving at least one entry on each side.
fn split_point(node: &Node, entries: &[(Value, Vec<u8>)]) -> usize {
    let half = node.capacity() / 2;
    let mut used = 0;
    for (i, (key, _)) in entries.iter().enumerate() {
        used += node.footprint(key);
        if used >= half {
            return (i + 1).clamp(1, entries.len() - 1);
        }
    }
    entries.len() - 1
}

fn fill(node: &mut Node, entries: &[(Value, Vec<u8>)]) -> anyhow::Result<()> {
    for (key, payload) in entries {
        if !node.try_insert(node.count(), key, payload) {
            return Err(anyhow!("split half does not fit in a page"));
        }
    }
    Ok(())
}

fn entry_not_found(key: &Value, rid: Rid) -> anyhow::Error {
    StorageError::EntryNotFound {
        key: key.to_string(),
        rid,
    }
    .into()
}
