//! Dollar-cost averaging: fixed-amount buys on a schedule.

use crate::schema::types::{ControlType, FieldConfig, ParamSchemaField, SchemaValidator, StrategySchema};
use serde_json::json;

pub const DCA_TYPE: &str = "dca";

pub fn dca_schema() -> StrategySchema {
    StrategySchema::new(DCA_TYPE, "定投", "1.0.0")
        .with_description("按固定周期买入固定金额，摊平持仓成本")
        .with_symbols(&["BTC/USDT", "ETH/USDT"])
        .with_timeframes(&["1d"])
        .with_field(
            ParamSchemaField::new("totalInvestment", "总投资额", ControlType::Number)
                .default_value(json!(1000))
                .required()
                .order(1)
                .config(FieldConfig::at_least(10.0).with_unit("USDT")),
        )
        .with_field(
            ParamSchemaField::new("amountPerPurchase", "每次买入", ControlType::Number)
                .default_value(json!(100))
                .required()
                .order(2)
                .config(FieldConfig::at_least(1.0).with_unit("USDT")),
        )
        .with_field(
            ParamSchemaField::new("frequency", "定投频率", ControlType::ButtonGroup)
                .default_value(json!("daily"))
                .required()
                .order(3)
                .config(FieldConfig::options(&[
                    ("每天", "daily"),
                    ("每周", "weekly"),
                    ("每两周", "biweekly"),
                    ("每月", "monthly"),
                ])),
        )
        .with_field(
            ParamSchemaField::computed(
                "estimatedPurchases",
                "预计买入次数",
                "floor(totalInvestment / amountPerPurchase)",
                &["totalInvestment", "amountPerPurchase"],
            )
            .order(4)
            .config(FieldConfig::default().with_unit("次")),
        )
        .with_field(
            ParamSchemaField::computed(
                "estimatedDays",
                "预计持续天数",
                "estimatedPurchases * (frequency === 'daily' ? 1 : frequency === 'weekly' ? 7 : frequency === 'biweekly' ? 14 : 30)",
                &["estimatedPurchases", "frequency"],
            )
            .order(5)
            .config(FieldConfig::default().with_unit("天")),
        )
        .with_field(
            ParamSchemaField::new("priceLimitEnabled", "价格上限保护", ControlType::Toggle)
                .default_value(json!(false))
                .advanced()
                .group("risk")
                .order(1)
                .description("价格高于设定值时暂停买入"),
        )
        .with_field(
            ParamSchemaField::new("maxBuyPrice", "最高买入价", ControlType::Number)
                .advanced()
                .group("risk")
                .order(2)
                .config(FieldConfig::at_least(0.0).with_unit("USDT"))
                .show_when("priceLimitEnabled === true"),
        )
        .with_validator(SchemaValidator::error(
            "purchaseWithinTotal",
            "amountPerPurchase <= totalInvestment",
            "每次买入金额不能超过总投资额",
        ))
        .with_validator(SchemaValidator::error(
            "minPurchase",
            "amountPerPurchase >= 10",
            "每次买入金额不能低于 10 USDT",
        ))
        .with_validator(SchemaValidator::warning(
            "enoughPurchases",
            "estimatedPurchases >= 3",
            "买入次数过少，难以起到摊平成本的效果",
        ))
        .with_validator(SchemaValidator::warning(
            "maxBuyPriceSet",
            "!priceLimitEnabled || maxBuyPrice > 0",
            "已开启价格上限保护，但未设置最高买入价",
        ))
}
