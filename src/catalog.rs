use crate::error::StorageError;
use crate::id::Rid;
use crate::index::{BTreeCursor, BTreeIndex};
use crate::record::{RecordScan, RecordStore};
use crate::schema::{attribute_position, AttrType, Attribute, CompOp, Value};
use crate::tuple::{decode_tuple, encode_tuple, format_tuple, tuple_field};
use anyhow::anyhow;
use std::path::{Path, PathBuf};

const TABLES: &str = "Tables";
const COLUMNS: &str = "Columns";
const INDEXES: &str = "Indexes";

const TABLES_ID: i32 = 1;
const COLUMNS_ID: i32 = 2;
const INDEXES_ID: i32 = 3;

const NAME_LENGTH: u32 = 50;

#[derive(Clone, Debug)]
pub struct Setting {
    pub table_extension: String,
    pub index_extension: String,
}

impl std::default::Default for Setting {
    fn default() -> Self {
        Self {
            table_extension: "t".to_string(),
            index_extension: "idx".to_string(),
        }
    }
}

impl Setting {
    fn validate(&self) -> anyhow::Result<()> {
        for extension in [&self.table_extension, &self.index_extension] {
            if extension.is_empty() || extension.contains(['.', '/', '\\']) {
                return Err(anyhow!("invalid file extension {extension:?}"));
            }
        }
        if self.table_extension == self.index_extension {
            return Err(anyhow!("table and index files can't share an extension"));
        }

        Ok(())
    }
}

fn tables_attrs() -> Vec<Attribute> {
    vec![
        Attribute::new("table-id", AttrType::Int, 4),
        Attribute::new("table-name", AttrType::VarChar, NAME_LENGTH),
        Attribute::new("file-name", AttrType::VarChar, NAME_LENGTH),
        Attribute::new("system", AttrType::Int, 4),
    ]
}

// Columns and Indexes share this shape.
fn columns_attrs() -> Vec<Attribute> {
    vec![
        Attribute::new("table-id", AttrType::Int, 4),
        Attribute::new("column-name", AttrType::VarChar, NAME_LENGTH),
        Attribute::new("column-type", AttrType::Int, 4),
        Attribute::new("column-length", AttrType::Int, 4),
        Attribute::new("column-position", AttrType::Int, 4),
    ]
}

fn system_tables() -> [(i32, &'static str, Vec<Attribute>); 3] {
    [
        (TABLES_ID, TABLES, tables_attrs()),
        (COLUMNS_ID, COLUMNS, columns_attrs()),
        (INDEXES_ID, INDEXES, columns_attrs()),
    ]
}

fn table_row(id: i32, name: &str, file_name: &str, system: bool) -> anyhow::Result<Vec<u8>> {
    encode_tuple(
        &tables_attrs(),
        &[
            Some(Value::Int(id)),
            Some(Value::from(name)),
            Some(Value::from(file_name)),
            Some(Value::Int(system as i32)),
        ],
    )
}

fn column_row(table_id: i32, attr: &Attribute, position: usize) -> anyhow::Result<Vec<u8>> {
    encode_tuple(
        &columns_attrs(),
        &[
            Some(Value::Int(table_id)),
            Some(Value::from(attr.name.as_str())),
            Some(Value::Int(attr.attr_type.code())),
            Some(Value::Int(attr.length as i32)),
            Some(Value::Int(position as i32)),
        ],
    )
}

fn varchar_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

struct TableInfo {
    id: i32,
    rid: Rid,
    file_name: String,
    system: bool,
}

/// A row of `Columns` or `Indexes`.
struct ColumnRow {
    rid: Rid,
    attr: Attribute,
    position: i32,
}

/// Catalog of tables and indexes kept in a directory, itself stored as the
/// system tables `Tables`, `Columns` and `Indexes`.
#[derive(Clone)]
pub struct RelationManager {
    dir: PathBuf,
    setting: Setting,
}

impl RelationManager {
    pub fn open(dir: &Path, setting: Setting) -> anyhow::Result<Self> {
        setting.validate()?;

        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        if !dir.is_dir() {
            return Err(anyhow!("path is not a directory"));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            setting,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_file_name(&self, table: &str) -> String {
        format!("{table}.{}", self.setting.table_extension)
    }

    fn index_path(&self, table: &str, attr: &str) -> PathBuf {
        self.dir
            .join(format!("{table}.{attr}.{}", self.setting.index_extension))
    }

    fn open_system(&self, table: &str) -> anyhow::Result<RecordStore> {
        RecordStore::open(&self.dir.join(self.table_file_name(table)))
    }

    pub fn create_catalog(&self) -> anyhow::Result<()> {
        for (_, name, _) in system_tables() {
            RecordStore::create_file(&self.dir.join(self.table_file_name(name)))?;
        }

        let tables = self.open_system(TABLES)?;
        let columns = self.open_system(COLUMNS)?;
        for (id, name, attrs) in system_tables() {
            tables.insert_record(
                &tables_attrs(),
                &table_row(id, name, &self.table_file_name(name), true)?,
            )?;
            for (i, attr) in attrs.iter().enumerate() {
                columns.insert_record(&columns_attrs(), &column_row(id, attr, i + 1)?)?;
            }
        }
        tables.close()?;
        columns.close()?;

        log::debug!("created catalog dir={:?}", self.dir);
        Ok(())
    }

    pub fn delete_catalog(&self) -> anyhow::Result<()> {
        for (_, name, _) in system_tables() {
            RecordStore::destroy_file(&self.dir.join(self.table_file_name(name)))?;
        }
        log::debug!("deleted catalog dir={:?}", self.dir);
        Ok(())
    }

    fn table_info(&self, table: &str) -> anyhow::Result<TableInfo> {
        let tables = self.open_system(TABLES)?;
        let mut scan = tables.scan(
            &tables_attrs(),
            "table-name",
            CompOp::Eq,
            Some(&Value::from(table)),
            &["table-id", "file-name", "system"],
        )?;
        let Some((rid, row)) = scan.next_record()? else {
            return Err(StorageError::TableNotFound(table.to_string()).into());
        };

        match decode_tuple(scan.attributes(), &row)?.as_slice() {
            [Some(Value::Int(id)), Some(Value::VarChar(file_name)), Some(Value::Int(system))] => {
                Ok(TableInfo {
                    id: *id,
                    rid,
                    file_name: varchar_string(file_name),
                    system: *system != 0,
                })
            }
            _ => Err(StorageError::Malformed("catalog table row").into()),
        }
    }

    fn writable_table(&self, table: &str) -> anyhow::Result<TableInfo> {
        let info = self.table_info(table)?;
        if info.system {
            return Err(StorageError::SystemTable(table.to_string()).into());
        }
        Ok(info)
    }

    /// Rows of `system` (`Columns` or `Indexes`) that belong to `table_id`,
    /// ordered by position.
    fn column_rows(&self, system: &str, table_id: i32) -> anyhow::Result<Vec<ColumnRow>> {
        let store = self.open_system(system)?;
        let scan = store.scan(
            &columns_attrs(),
            "table-id",
            CompOp::Eq,
            Some(&Value::Int(table_id)),
            &[
                "column-name",
                "column-type",
                "column-length",
                "column-position",
            ],
        )?;
        let attrs = scan.attributes().to_vec();

        let mut rows = vec![];
        for item in scan {
            let (rid, row) = item?;
            let values = decode_tuple(&attrs, &row)?;
            let [
                Some(Value::VarChar(name)),
                Some(Value::Int(code)),
                Some(Value::Int(length)),
                Some(Value::Int(position)),
            ] = values.as_slice()
            else {
                return Err(StorageError::Malformed("catalog column row").into());
            };
            rows.push(ColumnRow {
                rid,
                attr: Attribute::new(
                    varchar_string(name),
                    AttrType::from_code(*code)?,
                    *length as u32,
                ),
                position: *position,
            });
        }
        rows.sort_by_key(|row| row.position);
        Ok(rows)
    }

    fn table_attrs(&self, info: &TableInfo) -> anyhow::Result<Vec<Attribute>> {
        Ok(self
            .column_rows(COLUMNS, info.id)?
            .into_iter()
            .map(|row| row.attr)
            .collect())
    }

    fn next_table_id(&self) -> anyhow::Result<i32> {
        let tables = self.open_system(TABLES)?;
        let scan = tables.scan(&tables_attrs(), "", CompOp::NoOp, None, &["table-id"])?;
        let attrs = scan.attributes().to_vec();
        let mut max_id = 0;
        for item in scan {
            let (_, row) = item?;
            if let Some(Value::Int(id)) = tuple_field(&attrs, &row, 0)? {
                max_id = max_id.max(id);
            }
        }
        Ok(max_id + 1)
    }

    pub fn create_table(&self, table: &str, attrs: &[Attribute]) -> anyhow::Result<()> {
        if table.is_empty() || table.contains(['.', '/', '\\']) {
            let message = format!("invalid table name {table:?}");
            return Err(StorageError::InvalidArgument(message).into());
        }
        if attrs.is_empty() {
            let message = format!("table {table:?} has no attributes");
            return Err(StorageError::InvalidArgument(message).into());
        }
        match self.table_info(table) {
            Ok(_) => return Err(StorageError::TableExists(table.to_string()).into()),
            Err(err) => {
                if !matches!(
                    err.downcast_ref::<StorageError>(),
                    Some(StorageError::TableNotFound(_))
                ) {
                    return Err(err);
                }
            }
        }

        let file_name = self.table_file_name(table);
        RecordStore::create_file(&self.dir.join(&file_name))?;
        let id = self.next_table_id()?;

        let tables = self.open_system(TABLES)?;
        tables.insert_record(&tables_attrs(), &table_row(id, table, &file_name, false)?)?;
        tables.close()?;

        let columns = self.open_system(COLUMNS)?;
        for (i, attr) in attrs.iter().enumerate() {
            columns.insert_record(&columns_attrs(), &column_row(id, attr, i + 1)?)?;
        }
        columns.close()?;

        log::debug!("created table table={table} id={id}");
        Ok(())
    }

    pub fn delete_table(&self, table: &str) -> anyhow::Result<()> {
        let info = self.writable_table(table)?;

        let index_rows = self.column_rows(INDEXES, info.id)?;
        let indexes = self.open_system(INDEXES)?;
        for row in &index_rows {
            indexes.delete_record(row.rid)?;
            BTreeIndex::destroy_file(&self.index_path(table, &row.attr.name))?;
        }
        indexes.close()?;

        let column_rows = self.column_rows(COLUMNS, info.id)?;
        let columns = self.open_system(COLUMNS)?;
        for row in &column_rows {
            columns.delete_record(row.rid)?;
        }
        columns.close()?;

        let tables = self.open_system(TABLES)?;
        tables.delete_record(info.rid)?;
        tables.close()?;

        RecordStore::destroy_file(&self.dir.join(&info.file_name))?;
        log::debug!("deleted table table={table} indexes={}", index_rows.len());
        Ok(())
    }

    /// Record file of `table` with its attributes, for readers that fetch by rid.
    pub(crate) fn table_store(&self, table: &str) -> anyhow::Result<(RecordStore, Vec<Attribute>)> {
        let info = self.table_info(table)?;
        let attrs = self.table_attrs(&info)?;
        Ok((RecordStore::open(&self.dir.join(&info.file_name))?, attrs))
    }

    pub fn get_attributes(&self, table: &str) -> anyhow::Result<Vec<Attribute>> {
        let info = self.table_info(table)?;
        self.table_attrs(&info)
    }

    /// Attributes of `table` that carry an index.
    pub fn get_indexes(&self, table: &str) -> anyhow::Result<Vec<Attribute>> {
        let info = self.table_info(table)?;
        Ok(self
            .column_rows(INDEXES, info.id)?
            .into_iter()
            .map(|row| row.attr)
            .collect())
    }

    /// Applies a tuple change to every index of the table: the key of `old`
    /// is removed and the key of `new` is added. Null keys are not indexed.
    fn maintain_indexes(
        &self,
        table: &str,
        info: &TableInfo,
        attrs: &[Attribute],
        rid: Rid,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        for row in self.column_rows(INDEXES, info.id)? {
            let position = attribute_position(attrs, &row.attr.name)?;
            let old_key = match old {
                Some(data) => tuple_field(attrs, data, position)?,
                None => None,
            };
            let new_key = match new {
                Some(data) => tuple_field(attrs, data, position)?,
                None => None,
            };
            if old.is_some() && new.is_some() && old_key == new_key {
                continue;
            }

            let index = BTreeIndex::open(&self.index_path(table, &row.attr.name), row.attr)?;
            if let Some(key) = &old_key {
                index.delete_entry(key, rid)?;
            }
            if let Some(key) = &new_key {
                index.insert_entry(key, rid)?;
            }
            index.close()?;
        }
        Ok(())
    }

    /// Fails if any index of the table could not take its key from `data`.
    fn check_index_keys(
        &self,
        info: &TableInfo,
        attrs: &[Attribute],
        data: &[u8],
    ) -> anyhow::Result<()> {
        for row in self.column_rows(INDEXES, info.id)? {
            let position = attribute_position(attrs, &row.attr.name)?;
            if let Some(key) = tuple_field(attrs, data, position)? {
                BTreeIndex::check_key(&row.attr, &key)?;
            }
        }
        Ok(())
    }

    pub fn insert_tuple(&self, table: &str, data: &[u8]) -> anyhow::Result<Rid> {
        let info = self.writable_table(table)?;
        let attrs = self.table_attrs(&info)?;
        self.check_index_keys(&info, &attrs, data)?;

        let store = RecordStore::open(&self.dir.join(&info.file_name))?;
        let rid = store.insert_record(&attrs, data)?;
        store.close()?;

        self.maintain_indexes(table, &info, &attrs, rid, None, Some(data))?;
        Ok(rid)
    }

    pub fn delete_tuple(&self, table: &str, rid: Rid) -> anyhow::Result<()> {
        let info = self.writable_table(table)?;
        let attrs = self.table_attrs(&info)?;

        let store = RecordStore::open(&self.dir.join(&info.file_name))?;
        let old = store.read_record(&attrs, rid)?;
        store.delete_record(rid)?;
        store.close()?;

        self.maintain_indexes(table, &info, &attrs, rid, Some(&old), None)
    }

    pub fn update_tuple(&self, table: &str, data: &[u8], rid: Rid) -> anyhow::Result<()> {
        let info = self.writable_table(table)?;
        let attrs = self.table_attrs(&info)?;
        self.check_index_keys(&info, &attrs, data)?;

        let store = RecordStore::open(&self.dir.join(&info.file_name))?;
        let old = store.read_record(&attrs, rid)?;
        store.update_record(&attrs, data, rid)?;
        store.close()?;

        self.maintain_indexes(table, &info, &attrs, rid, Some(&old), Some(data))
    }

    pub fn read_tuple(&self, table: &str, rid: Rid) -> anyhow::Result<Vec<u8>> {
        let (store, attrs) = self.table_store(table)?;
        store.read_record(&attrs, rid)
    }

    pub fn read_attribute(&self, table: &str, rid: Rid, attr: &str) -> anyhow::Result<Value> {
        let (store, attrs) = self.table_store(table)?;
        store.read_attribute(&attrs, rid, attr)
    }

    pub fn print_tuple(&self, attrs: &[Attribute], data: &[u8]) -> anyhow::Result<String> {
        format_tuple(attrs, data)
    }

    /// Scans `table`, system tables included. The scan owns its own handle.
    pub fn scan(
        &self,
        table: &str,
        condition_attr: &str,
        op: CompOp,
        value: Option<&Value>,
        projection: &[&str],
    ) -> anyhow::Result<RecordScan> {
        let (store, attrs) = self.table_store(table)?;
        store.scan(
            &attrs,
            condition_attr,
            op,
            value,
            projection,
        )
    }

    /// Creates an index over `attr` and loads it with every record already in the table.
    pub fn create_index(&self, table: &str, attr: &str) -> anyhow::Result<()> {
        let info = self.writable_table(table)?;
        let attrs = self.table_attrs(&info)?;
        let position = attribute_position(&attrs, attr)?;
        if self
            .column_rows(INDEXES, info.id)?
            .iter()
            .any(|row| row.attr.name == attr)
        {
            return Err(StorageError::IndexExists {
                table: table.to_string(),
                attr: attr.to_string(),
            }
            .into());
        }

        // the index is registered only once every existing row is loaded
        let path = self.index_path(table, attr);
        BTreeIndex::create_file(&path)?;
        let loaded = match self.load_index(&path, &info, &attrs, position) {
            Ok(loaded) => loaded,
            Err(err) => {
                BTreeIndex::destroy_file(&path)?;
                return Err(err);
            }
        };

        let indexes = self.open_system(INDEXES)?;
        indexes.insert_record(
            &columns_attrs(),
            &column_row(info.id, &attrs[position], position + 1)?,
        )?;
        indexes.close()?;

        log::debug!("created index table={table} attr={attr} entries={loaded}");
        Ok(())
    }

    fn load_index(
        &self,
        path: &Path,
        info: &TableInfo,
        attrs: &[Attribute],
        position: usize,
    ) -> anyhow::Result<usize> {
        let key_attr = &attrs[position];
        let index = BTreeIndex::open(path, key_attr.clone())?;
        let store = RecordStore::open(&self.dir.join(&info.file_name))?;
        let scan = store.scan(attrs, "", CompOp::NoOp, None, &[key_attr.name.as_str()])?;
        let key_attrs = scan.attributes().to_vec();
        let mut loaded = 0;
        for item in scan {
            let (rid, row) = item?;
            if let Some(key) = tuple_field(&key_attrs, &row, 0)? {
                index.insert_entry(&key, rid)?;
                loaded += 1;
            }
        }
        index.close()?;
        Ok(loaded)
    }

    fn index_row(&self, table: &str, info: &TableInfo, attr: &str) -> anyhow::Result<ColumnRow> {
        self.column_rows(INDEXES, info.id)?
            .into_iter()
            .find(|row| row.attr.name == attr)
            .ok_or_else(|| {
                StorageError::IndexNotFound {
                    table: table.to_string(),
                    attr: attr.to_string(),
                }
                .into()
            })
    }

    pub fn destroy_index(&self, table: &str, attr: &str) -> anyhow::Result<()> {
        let info = self.writable_table(table)?;
        let row = self.index_row(table, &info, attr)?;

        let indexes = self.open_system(INDEXES)?;
        indexes.delete_record(row.rid)?;
        indexes.close()?;
        BTreeIndex::destroy_file(&self.index_path(table, attr))?;

        log::debug!("destroyed index table={table} attr={attr}");
        Ok(())
    }

    /// Range scan over the index on `table.attr`. The cursor owns its own handle.
    pub fn index_scan(
        &self,
        table: &str,
        attr: &str,
        low: Option<&Value>,
        high: Option<&Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> anyhow::Result<BTreeCursor> {
        let info = self.table_info(table)?;
        let row = self.index_row(table, &info, attr)?;
        BTreeIndex::open(&self.index_path(table, attr), row.attr)?.scan(
            low,
            high,
            low_inclusive,
            high_inclusive,
        )
    }
}
